//! The record surface: the compiled field table, the [`Record`] trait every persisted
//! type implements (normally via `#[derive(Record)]` from `remodel-derive`), and the
//! two interchangeable ID generators.

use crate::codec::Marshaller;
use crate::error::Result;

/// How a field's value converts to and from a Redis bulk string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar: integer, float, bool, `String`, or byte slice.
    Primitive,
    /// `Option<primitive>`; `None` persists as the literal `"NULL"`.
    PointerPrimitive,
    /// Anything else; persisted via the fallback [`Marshaller`].
    Inconvertible,
}

/// Whether and how a field participates in a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    Numeric,
    String,
    Boolean,
}

/// One compiled field of a registered record type. Built once, at compile time, by
/// `#[derive(Record)]` and handed back as a `'static` slice from [`Record::fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub redis_name: &'static str,
    pub kind: FieldKind,
    pub index: IndexKind,
}

impl FieldSpec {
    pub fn is_indexed(&self) -> bool {
        self.index != IndexKind::None
    }

    pub fn find<'a>(fields: &'a [FieldSpec], name: &str) -> Option<&'a FieldSpec> {
        fields.iter().find(|f| f.name == name || f.redis_name == name)
    }
}

/// A plain record type persisted by this engine as a Redis hash.
///
/// Implementations are generated by `#[derive(Record)]`; see `remodel-derive`. The
/// trait is the only coupling the rest of the engine has to a concrete type's layout.
pub trait Record: Default + Send + Sync + 'static {
    /// Unique name for this type, defaulting to its Rust type name.
    fn type_name() -> &'static str;

    /// The compiled field table, in declaration order, excluding the `id` field and
    /// any `#[redis(skip)]` fields.
    fn fields() -> &'static [FieldSpec];

    /// The record's identifier. Empty before the first save.
    fn id(&self) -> &str;

    /// Assign an identifier (caller-provided or generated on first save).
    fn set_id(&mut self, id: String);

    fn has_id(&self) -> bool {
        !self.id().is_empty()
    }

    /// Encode one field's current value to its bulk-string form. Generic over the
    /// fallback marshaller so inconvertible fields can be serialized by whichever
    /// [`Marshaller`] the owning `Collection` was configured with.
    fn encode_field<M: Marshaller>(&self, spec: &FieldSpec, marshaller: &M) -> Result<Vec<u8>>;

    /// Decode one field's bulk-string form into this record. `None` (a nil reply)
    /// leaves the field unchanged.
    fn decode_field<M: Marshaller>(
        &mut self,
        spec: &FieldSpec,
        marshaller: &M,
        raw: Option<&[u8]>,
    ) -> Result<()>;
}

/// Random and sequential ID generators, both sufficient per the design's "uniqueness
/// with very high probability" contract. [`collection::Collection::save`] uses
/// [`random_id`] unless a different generator is installed.
pub mod id {
    use once_cell::sync::Lazy;
    use rand::Rng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Alphabet for [`random_id`]: `{1..9,A..Z,a..z}` minus the visually ambiguous
    /// characters `0`, `I`, `l`, `O`.
    const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    /// A random 22-character ID drawn from [`ALPHABET`].
    pub fn random_id() -> String {
        let mut rng = rand::rng();
        (0..22)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    // Stand-in for a MAC address: fetching a real network-interface MAC is
    // platform-specific and out of scope for this engine, so a random 6-byte value
    // generated once per process plays the same role (a stable-for-the-process,
    // almost-certainly-unique component of the ID).
    static PSEUDO_MAC: Lazy<[u8; 6]> = Lazy::new(|| rand::rng().random());

    /// A 4-component ID: base58(unix seconds) ∥ base58(counter mod 58⁴, padded to 4) ∥
    /// base58(crc32(pseudo-MAC)) ∥ 6 random characters.
    pub fn sequential_id() -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) as u64 % 58u64.pow(4);

        let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
        let mac_crc = crc.checksum(&*PSEUDO_MAC);

        let mut out = bs58::encode(secs.to_be_bytes()).into_string();
        out.push_str(&pad_base58(&bs58::encode(counter.to_be_bytes()).into_string(), 4));
        out.push_str(&bs58::encode(mac_crc.to_be_bytes()).into_string());

        let mut rng = rand::rng();
        for _ in 0..6 {
            out.push(ALPHABET[rng.random_range(0..ALPHABET.len())] as char);
        }
        out
    }

    fn pad_base58(s: &str, width: usize) -> String {
        if s.len() >= width {
            s[s.len() - width..].to_owned()
        } else {
            format!("{}{}", "1".repeat(width - s.len()), s)
        }
    }
}
