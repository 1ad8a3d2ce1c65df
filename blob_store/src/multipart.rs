//! Types shared by the multipart upload methods of
//! [`ObjectStoreAdapter`](crate::ObjectStoreAdapter).

/// A part that was uploaded and is ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Store part number (starts from 1).
    pub part_number: u32,

    /// Tag returned by the store for the part (S3 ETag, Azure block id).
    pub tag: String,

    pub size_bytes: u64,
}

/// Whether `parts` are already in ascending part-number order.
pub fn in_part_number_order(parts: &[CompletedPart]) -> bool {
    parts
        .windows(2)
        .all(|pair| pair[0].part_number < pair[1].part_number)
}
