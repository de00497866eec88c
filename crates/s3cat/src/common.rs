//! 📦 Common data structures: the building blocks of s3cat.
//!
//! 🎬 COLD OPEN: INT. S3 BUCKET, 3:47 AM
//!
//! Four hundred thousand JSON files, each about the size of a tweet, sit in a
//! prefix. Athena is crying. The bill is crying. Somebody says "just cat them
//! together" as if `cat` had ever heard of a bucket.
//!
//! These structs ferry names and sizes from the listing to the assembly line.
//! They don't carry bytes. Bytes are heavy. Names are cheap. 🦆

/// 🪣 One object as the listing saw it: a key and how many bytes live there.
///
/// The size is taken on faith. We never re-measure it, because the listing
/// already did and a second HEAD per object is how you lose a weekend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRecord {
    pub key: String,
    pub size: u64,
}

impl SourceRecord {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// 🧺 A bounded bundle of records that will become exactly one output object.
///
/// `index` is 1-based and dense. Nobody gets index 0. Index 0 is for arrays
/// and people who have given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub index: u32,
    pub members: Vec<SourceRecord>,
}

impl Group {
    /// 📊 Sum of member sizes. Saturating, because u64 overflow is a 16 exabyte problem
    /// and if you have that problem you also have a very nice boat.
    pub fn total_bytes(&self) -> u64 {
        self.members
            .iter()
            .fold(0u64, |acc, record| acc.saturating_add(record.size))
    }
}

/// 🏷️ One finished part of a multipart upload: its number and the etag the store handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    pub part_number: u32,
    pub etag: String,
}

/// 🎫 An open multipart upload. S3 wants the key AND the upload id on every call,
/// so the pair travels together like a passport and a boarding pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub key: String,
    pub upload_id: String,
}

/// 📄 One page of a listing, plus the breadcrumb for the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub records: Vec<SourceRecord>,
    /// `None` once the listing is exhausted.
    pub next: Option<String>,
}
