//! Segment membership lookup. Segmentation itself lives outside the engine;
//! this is the seam it plugs into.

pub trait SegmentResolver: Send + Sync {
    /// Whether `user_id` belongs to any of `segments`.
    fn is_member(&self, user_id: &str, segments: &[String]) -> bool;
}

/// Stand-in used when no segmentation service is wired: everyone matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllUsersMatch;

impl SegmentResolver for AllUsersMatch {
    fn is_member(&self, _user_id: &str, _segments: &[String]) -> bool {
        true
    }
}
