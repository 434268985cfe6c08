use chrono::Utc;
use uuid::Uuid;

use super::store::{Document, DocumentStore, StoreError};
use crate::models::{Booking, BookingKind, UserProfile};

pub const USERS: &str = "users";

/// Ids are generated before the write so the transaction id can go into the
/// same insert.
pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn booking_from_document(doc: &Document) -> Result<Booking, StoreError> {
    let mut booking: Booking = doc.decode()?;
    booking.version = doc.version;
    Ok(booking)
}

/// Decode a batch, skipping documents that no longer match the booking shape.
fn decode_bookings(docs: Vec<Document>, collection: &str) -> Vec<Booking> {
    docs.iter()
        .filter_map(|doc| match booking_from_document(doc) {
            Ok(b) => Some(b),
            Err(e) => {
                tracing::warn!(collection, id = %doc.id, error = %e, "skipping malformed booking");
                None
            }
        })
        .collect()
}

// ── Bookings ──

pub async fn insert_booking(
    store: &dyn DocumentStore,
    booking: &mut Booking,
) -> Result<(), StoreError> {
    let data = serde_json::to_value(&*booking)?;
    booking.version = store
        .insert(booking.kind().collection(), &booking.id, &data)
        .await?;
    Ok(())
}

/// Version-checked write of the whole booking. On success `booking.version`
/// is advanced; on `Conflict` the caller must re-read.
pub async fn save_booking(
    store: &dyn DocumentStore,
    booking: &mut Booking,
) -> Result<(), StoreError> {
    let data = serde_json::to_value(&*booking)?;
    booking.version = store
        .replace(booking.kind().collection(), &booking.id, booking.version, &data)
        .await?;
    Ok(())
}

pub async fn delete_booking(store: &dyn DocumentStore, booking: &Booking) -> Result<bool, StoreError> {
    store.delete(booking.kind().collection(), &booking.id).await
}

pub async fn get_booking(
    store: &dyn DocumentStore,
    kind: BookingKind,
    id: &str,
) -> Result<Option<Booking>, StoreError> {
    store
        .get(kind.collection(), id)
        .await?
        .as_ref()
        .map(booking_from_document)
        .transpose()
}

pub async fn find_booking_by_transaction_id(
    store: &dyn DocumentStore,
    transaction_id: &str,
) -> Result<Option<Booking>, StoreError> {
    for kind in BookingKind::ALL {
        let docs = store
            .find_by_field(kind.collection(), "transactionId", transaction_id)
            .await?;
        if let Some(doc) = docs.first() {
            return booking_from_document(doc).map(Some);
        }
    }
    Ok(None)
}

/// Hotel collection first, then vehicle, then the id taken as a transaction id.
pub async fn find_booking(store: &dyn DocumentStore, id: &str) -> Result<Option<Booking>, StoreError> {
    for kind in BookingKind::ALL {
        if let Some(booking) = get_booking(store, kind, id).await? {
            return Ok(Some(booking));
        }
    }
    find_booking_by_transaction_id(store, id).await
}

pub async fn list_bookings(
    store: &dyn DocumentStore,
    kind: BookingKind,
) -> Result<Vec<Booking>, StoreError> {
    let docs = store.list(kind.collection()).await?;
    Ok(decode_bookings(docs, kind.collection()))
}

pub async fn list_all_bookings(store: &dyn DocumentStore) -> Result<Vec<Booking>, StoreError> {
    let mut all = list_bookings(store, BookingKind::Hotel).await?;
    all.extend(list_bookings(store, BookingKind::Vehicle).await?);
    Ok(all)
}

pub async fn list_bookings_for_user(
    store: &dyn DocumentStore,
    uid: &str,
) -> Result<Vec<Booking>, StoreError> {
    let mut all = vec![];
    for kind in BookingKind::ALL {
        let docs = store.find_by_field(kind.collection(), "userId", uid).await?;
        all.extend(decode_bookings(docs, kind.collection()));
    }
    Ok(all)
}

// ── Users ──

pub async fn get_user_profile(
    store: &dyn DocumentStore,
    uid: &str,
) -> Result<Option<UserProfile>, StoreError> {
    match store.get(USERS, uid).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

pub async fn save_user_profile(
    store: &dyn DocumentStore,
    uid: &str,
    display_name: &str,
    email: Option<&str>,
) -> Result<UserProfile, StoreError> {
    let existing = store.get(USERS, uid).await?;
    let previous: Option<UserProfile> = existing.as_ref().map(|d| d.decode()).transpose()?;

    let profile = UserProfile {
        display_name: display_name.to_string(),
        email: email
            .map(str::to_string)
            .or_else(|| previous.and_then(|p| p.email)),
        updated_at: Utc::now(),
    };
    let data = serde_json::to_value(&profile)?;

    match existing {
        Some(doc) => store.replace(USERS, uid, doc.version, &data).await?,
        None => store.insert(USERS, uid, &data).await?,
    };
    Ok(profile)
}
