// src/repositories/entity.rs

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DataResult;
use crate::store::Record;

/// A persisted record type.
///
/// Repositories never look inside an entity beyond its key; the body is
/// stored as the serde_json document of the value.
///
/// Example:
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Customer { id: u32, name: String }
///
/// impl Entity for Customer {
///     const COLLECTION: &'static str = "customers";
///     fn key(&self) -> String { self.id.to_string() }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Store partition holding every entity of this type.
    const COLLECTION: &'static str;

    /// Identity used by the store to resolve updates and deletes.
    fn key(&self) -> String;

    fn to_record(&self) -> DataResult<Record> {
        Ok(Record::new(Self::COLLECTION, self.key(), serde_json::to_value(self)?))
    }

    fn from_record(record: &Record) -> DataResult<Self> {
        Ok(serde_json::from_value(record.body.clone())?)
    }
}
