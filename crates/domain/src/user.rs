use crate::errors::DomainError;
use crate::patch::Patch;
use crate::value_objects::{DisplayName, Timestamp, UserEmail, UserId};

/// 用户资料。认证材料单独保存在 [`crate::Credentials`] 中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: DisplayName,
    pub email: UserEmail,
    pub bio: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 资料的部分更新。显式提供的空字符串会清空 `bio` / `profile_image_url`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Patch<DisplayName>,
    pub bio: Patch<String>,
    pub profile_image_url: Patch<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        !self.name.is_set() && !self.bio.is_set() && !self.profile_image_url.is_set()
    }
}

const MAX_BIO_LENGTH: usize = 500;

impl User {
    pub fn register(id: UserId, name: DisplayName, email: UserEmail, now: Timestamp) -> Self {
        Self {
            id,
            name,
            email,
            bio: None,
            profile_image_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_update(&mut self, update: ProfileUpdate, now: Timestamp) -> Result<(), DomainError> {
        if let Patch::Set(bio) = &update.bio {
            if bio.chars().count() > MAX_BIO_LENGTH {
                return Err(DomainError::invalid_argument("bio", "too long"));
            }
        }

        let mut changed = update.name.apply_to(&mut self.name);
        changed |= update.bio.map(non_empty).apply_to(&mut self.bio);
        changed |= update
            .profile_image_url
            .map(non_empty)
            .apply_to(&mut self.profile_image_url);

        if changed {
            self.updated_at = now;
        }
        Ok(())
    }

    pub fn set_profile_image(&mut self, url: String, now: Timestamp) {
        self.profile_image_url = Some(url);
        self.updated_at = now;
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
