//! Creation and modification stamps.
//!
//! Implement the traits and name the stamping methods as lifecycle hooks:
//!
//! ```ignore
//! #[derive(Model, Debug, Default)]
//! #[orm(table = "notes", before_insert = "stamp_created", before_update = "stamp_updated")]
//! struct Note {
//!     state: ModelState,
//!     note_id: Option<i64>,
//!     created_at: Option<DateTime<Utc>>,
//!     updated_at: Option<DateTime<Utc>>,
//! }
//!
//! impl CreatedAt for Note {
//!     fn created_at_mut(&mut self) -> &mut Option<DateTime<Utc>> {
//!         &mut self.created_at
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};

use crate::model::Model;

/// Models recording when they were first inserted.
pub trait CreatedAt: Model {
    fn created_at_mut(&mut self) -> &mut Option<DateTime<Utc>>;

    /// Set the creation time unless one was assigned already.
    fn stamp_created(&mut self) {
        self.created_at_mut().get_or_insert_with(Utc::now);
    }
}

/// Models recording when they were last updated.
pub trait UpdatedAt: Model {
    fn updated_at_mut(&mut self) -> &mut Option<DateTime<Utc>>;

    fn stamp_updated(&mut self) {
        *self.updated_at_mut() = Some(Utc::now());
    }
}
