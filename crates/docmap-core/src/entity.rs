//! Entity model.
//!
//! An entity is a serde-serializable record with a string identity stored
//! under `_id`, a creation timestamp and optional capabilities that opt the
//! type into interception, read filtering, chunk ownership or modification
//! stamping.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{OnceLock, Weak};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::driver::{Session, SessionHandle};

/// How a field takes part in [`Db::save_preserving`](crate::Db::save_preserving).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preservation {
    /// Keep the stored value; never written by a preserving save.
    Preserve,
    /// Always written; every other field is preserved.
    DontPreserve,
}

/// A document-backed record.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary collection name.
    const COLLECTION: &'static str;

    /// Whether a registered save interceptor runs before every write.
    const SAVE_INTERCEPTED: bool = false;

    /// Whether a registered data filter applies to every read.
    const DATA_FILTERED: bool = false;

    /// Whether the entity owns binary chunks that die with it.
    const FILE_ENTITY: bool = false;

    /// Serialized name of the modification-time field, if the type has one.
    const MODIFIED_ON_FIELD: Option<&'static str> = None;

    /// Identity. Empty when the entity has never been saved.
    fn id(&self) -> &str;

    /// Set the identity.
    fn set_id(&mut self, id: String);

    /// Creation time, if assigned.
    fn created_on(&self) -> Option<DateTime<Utc>>;

    /// Set the creation time.
    fn set_created_on(&mut self, at: DateTime<Utc>);

    /// Produce a fresh identity.
    fn generate_new_id(&self) -> String {
        ObjectId::new().to_hex()
    }

    /// Set the modification time. Types with [`Self::MODIFIED_ON_FIELD`]
    /// override this.
    fn set_modified_on(&mut self, _at: DateTime<Utc>) {}

    /// Declarative preserve / don't-preserve table used by preserving saves.
    fn field_preservation() -> &'static [(&'static str, Preservation)] {
        &[]
    }

    /// The session slot, for types that can be bound to a transaction.
    fn session_slot(&self) -> Option<&SessionSlot> {
        None
    }

    /// Mutable access to the session slot.
    fn session_slot_mut(&mut self) -> Option<&mut SessionSlot> {
        None
    }

    /// The bound session, if one is attached and still alive.
    fn session(&self) -> Option<SessionHandle> {
        self.session_slot().and_then(SessionSlot::get)
    }

    /// Bind the entity to a session. Returns false if the type has no slot.
    fn attach_session(&mut self, session: &SessionHandle) -> bool {
        match self.session_slot_mut() {
            Some(slot) => {
                slot.attach(session);
                true
            }
            None => false,
        }
    }
}

/// A non-owning back-reference from an entity to its session.
///
/// Mark the field `#[serde(skip)]`.
#[derive(Default, Clone)]
pub struct SessionSlot(Option<Weak<dyn Session>>);

impl SessionSlot {
    /// Point the slot at a session.
    pub fn attach(&mut self, session: &SessionHandle) {
        self.0 = Some(std::sync::Arc::downgrade(session));
    }

    /// Clear the slot.
    pub fn detach(&mut self) {
        self.0 = None;
    }

    /// Upgrade to the session if it is still alive.
    pub fn get(&self) -> Option<SessionHandle> {
        self.0.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(session) => write!(f, "SessionSlot({})", session.id()),
            None => f.write_str("SessionSlot(None)"),
        }
    }
}

/// A 12-byte database-native identifier.
///
/// Layout: 4-byte big-endian seconds timestamp, 5 random bytes fixed per
/// process, 3-byte big-endian counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl ObjectId {
    /// Generate a new identifier.
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp() as u32;
        let unique = PROCESS_UNIQUE.get_or_init(|| rand::thread_rng().gen());
        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::thread_rng().gen_range(0..0x00ff_ffff)))
            .fetch_add(1, Ordering::Relaxed)
            & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(unique);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Parse a 24-character hex string.
    pub fn parse(hex_str: &str) -> Option<Self> {
        let decoded = hex::decode(hex_str).ok()?;
        let bytes: [u8; 12] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Creation second encoded in the identifier.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(seconds), 0).unwrap_or_default()
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw bytes.
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
