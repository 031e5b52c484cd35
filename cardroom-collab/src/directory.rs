//! User profile lookup, used to annotate cards and votes with names.
//!
//! The directory itself is an external collaborator; this crate only needs
//! read access by id.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Read-only rendering of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read user directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse user directory: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: &str) -> Result<Option<UserProfile>, DirectoryError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<String, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, profile: UserProfile) -> Self {
        self.users.insert(profile.id.clone(), profile);
        self
    }

    /// Load a JSON array of profiles.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let text = std::fs::read_to_string(path)?;
        let profiles: Vec<UserProfile> = serde_json::from_str(&text)?;
        Ok(profiles.into_iter().fold(Self::new(), Self::with_user))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get_user(&self, id: &str) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self.users.get(id).cloned())
    }
}
