//! Student records
//!
//! The serialized shape matches the persisted `students` slot:
//! `{ "id", "name", "email", "password", "feesPaid" }`.

use serde::{Deserialize, Serialize};

/// A student record
///
/// `password` is stored and compared as a plain value. This is a demo portal,
/// not an authentication system; see DESIGN.md before reusing this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Stable identifier, immutable after creation
    pub id: String,
    /// Display name
    pub name: String,
    /// Unique across the collection, case-sensitive
    pub email: String,
    /// Plain credential value
    pub password: String,
    /// Only ever moves from `false` to `true`
    pub fees_paid: bool,
}

impl Student {
    /// Create a new student who has not paid fees yet
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            password: password.into(),
            fees_paid: false,
        }
    }

    /// Builder-style setter for the fee status, used for fixtures and seeding
    pub fn with_fees_paid(mut self, fees_paid: bool) -> Self {
        self.fees_paid = fees_paid;
        self
    }

    /// Mark fees as paid. There is no way back.
    pub fn mark_fees_paid(&mut self) {
        self.fees_paid = true;
    }

    /// Apply a profile update in place
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
    }
}

/// Partial profile change. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

/// Sample students written on the very first run of a fresh namespace
pub fn seed_students() -> Vec<Student> {
    [
        ("1", "Alice Johnson", "alice@student.edu", true),
        ("2", "Bob Smith", "bob@student.edu", false),
        ("3", "Carol Davis", "carol@student.edu", true),
        ("4", "David Wilson", "david@student.edu", false),
        ("5", "Emma Brown", "emma@student.edu", true),
    ]
    .into_iter()
    .map(|(id, name, email, paid)| {
        Student::new(id, name, email, "password123").with_fees_paid(paid)
    })
    .collect()
}
