//! People picker: directory search merged with the device address book.
//!
//! The merge deduplicates on normalized phone numbers so the same person
//! appears once whether they are already on Missive, only in the viewer's
//! contacts, or both.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use missive_shared::constants::{DIRECTORY_SEARCH_LIMIT, MIN_PHONE_DIGITS};
use missive_shared::{Result, UserId, UserProfile};
use missive_store::UserDirectory;

/// A contact read from the device address book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContact {
    pub display_name: String,
    pub phone: String,
}

/// Source of device contacts.
pub trait ContactsProvider: Send + Sync {
    /// Current address-book snapshot.
    fn contacts(&self) -> Vec<DeviceContact>;
}

/// Fixed contact list, for tests and platforms without an address book.
#[derive(Debug, Clone, Default)]
pub struct StaticContacts {
    contacts: Vec<DeviceContact>,
}

impl StaticContacts {
    pub fn new(contacts: Vec<DeviceContact>) -> Self {
        Self { contacts }
    }
}

impl ContactsProvider for StaticContacts {
    fn contacts(&self) -> Vec<DeviceContact> {
        self.contacts.clone()
    }
}

/// Strips formatting from a phone number. Returns `None` when fewer than
/// [`MIN_PHONE_DIGITS`] digits remain; such numbers never take part in
/// matching.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= MIN_PHONE_DIGITS).then_some(digits)
}

/// One row in the people picker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactEntry {
    /// Registered profile, when the person is on Missive.
    pub profile: Option<UserProfile>,
    /// Address-book name, when the person is in the viewer's contacts.
    pub device_name: Option<String>,
    pub phone: String,
}

impl ContactEntry {
    /// Name to render: the registered username when known, otherwise the
    /// device name, otherwise the raw phone number.
    pub fn display_name(&self) -> &str {
        if let Some(profile) = &self.profile {
            return &profile.username;
        }
        if let Some(name) = &self.device_name {
            return name;
        }
        &self.phone
    }
}

/// Merges directory search results with the device address book.
pub struct ContactBook<P> {
    viewer: UserId,
    directory: UserDirectory,
    provider: P,
}

impl<P: ContactsProvider> ContactBook<P> {
    pub fn new(viewer: UserId, directory: UserDirectory, provider: P) -> Self {
        Self {
            viewer,
            directory,
            provider,
        }
    }

    /// Username prefix search over the directory, merged with device
    /// contacts whose display name matches the same prefix.
    ///
    /// Rows dedup on normalized phone. When a person appears on both
    /// sides, the registered profile wins and keeps the device name
    /// alongside. The viewer never appears in their own results.
    pub async fn search(&self, prefix: &str) -> Result<Vec<ContactEntry>> {
        let profiles = self
            .directory
            .search_prefix(prefix, DIRECTORY_SEARCH_LIMIT)
            .await?;
        let device = self.provider.contacts();
        let device_by_phone: HashMap<String, &DeviceContact> = device
            .iter()
            .filter_map(|c| normalize_phone(&c.phone).map(|p| (p, c)))
            .collect();

        let needle = prefix.trim().to_lowercase();
        let mut entries = Vec::new();
        let mut seen_phones = HashSet::new();

        for profile in profiles {
            if profile.uid == self.viewer {
                continue;
            }
            let normalized = normalize_phone(&profile.phone);
            let device_name = normalized
                .as_ref()
                .and_then(|p| device_by_phone.get(p))
                .map(|c| c.display_name.clone());
            if let Some(p) = normalized {
                seen_phones.insert(p);
            }
            entries.push(ContactEntry {
                phone: profile.phone.clone(),
                profile: Some(profile),
                device_name,
            });
        }

        if needle.is_empty() {
            return Ok(entries);
        }
        for contact in &device {
            let Some(normalized) = normalize_phone(&contact.phone) else {
                continue;
            };
            if seen_phones.contains(&normalized) {
                continue;
            }
            if !contact.display_name.to_lowercase().starts_with(&needle) {
                continue;
            }
            seen_phones.insert(normalized);
            entries.push(ContactEntry {
                profile: None,
                device_name: Some(contact.display_name.clone()),
                phone: contact.phone.clone(),
            });
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use missive_store::{Database, NewProfile};

    fn device(name: &str, phone: &str) -> DeviceContact {
        DeviceContact {
            display_name: name.to_string(),
            phone: phone.to_string(),
        }
    }

    async fn directory_with(profiles: &[(&str, &str, &str)]) -> UserDirectory {
        let directory = UserDirectory::new(Database::new());
        for (uid, username, phone) in profiles {
            directory
                .upsert_profile(&NewProfile {
                    uid: UserId::new(*uid),
                    username: (*username).to_string(),
                    phone: (*phone).to_string(),
                })
                .await
                .unwrap();
        }
        directory
    }

    #[test]
    fn normalization_strips_formatting_and_rejects_short_numbers() {
        assert_eq!(
            normalize_phone("+1 (555) 000-1234").as_deref(),
            Some("15550001234")
        );
        assert_eq!(normalize_phone("555.000.1234").as_deref(), Some("5550001234"));
        assert_eq!(normalize_phone("911"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[tokio::test]
    async fn registered_contacts_win_but_keep_the_device_name() {
        let directory =
            directory_with(&[("u-ada", "ada", "+1 (555) 000-1234")]).await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::new(vec![device("Ada L.", "15550001234")]),
        );

        let entries = book.search("ad").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].profile.as_ref().map(|p| p.uid.clone()),
            Some(UserId::new("u-ada"))
        );
        assert_eq!(entries[0].device_name.as_deref(), Some("Ada L."));
        assert_eq!(entries[0].display_name(), "ada");
    }

    #[tokio::test]
    async fn unregistered_device_contacts_round_out_the_results() {
        let directory = directory_with(&[("u-ada", "ada", "+15550001234")]).await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::new(vec![
                device("Adele", "+15550009999"),
                device("Bruno", "+15550008888"),
            ]),
        );

        let entries = book.search("ad").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].profile.is_some());
        assert!(entries[1].profile.is_none());
        assert_eq!(entries[1].display_name(), "Adele");
    }

    #[tokio::test]
    async fn the_viewer_never_sees_themselves() {
        let directory = directory_with(&[
            ("u-me", "adrian", "+15550007777"),
            ("u-ada", "ada", "+15550001234"),
        ])
        .await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::default(),
        );

        let entries = book.search("ad").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name(), "ada");
    }

    #[tokio::test]
    async fn short_device_numbers_never_match_anything() {
        let directory = directory_with(&[]).await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::new(vec![device("Emergency", "911")]),
        );

        let entries = book.search("em").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn duplicate_device_numbers_collapse_to_one_row() {
        let directory = directory_with(&[]).await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::new(vec![
                device("Cleo work", "+1 555-000-4321"),
                device("Cleo", "15550004321"),
            ]),
        );

        let entries = book.search("cleo").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn a_blank_query_returns_nothing() {
        let directory = directory_with(&[("u-ada", "ada", "+15550001234")]).await;
        let book = ContactBook::new(
            UserId::new("u-me"),
            directory,
            StaticContacts::new(vec![device("Ada L.", "+15550001234")]),
        );

        assert!(book.search("").await.unwrap().is_empty());
        assert!(book.search("   ").await.unwrap().is_empty());
    }
}
