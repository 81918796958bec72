use crate::db::ReferenceKind;
use super::scanner::find_subslice;

/// Present in the first chunk of a followings export
pub const FOLLOWINGS_MARKER: &[u8] = b"relationships_following";

/// Decide which reference collection an export file feeds, from its first chunk.
pub fn classify(first_chunk: &[u8]) -> ReferenceKind {
    if find_subslice(first_chunk, FOLLOWINGS_MARKER).is_some() {
        ReferenceKind::Followings
    } else {
        ReferenceKind::Followers
    }
}
