use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// The kind of access being recorded. Currently advisory; all access types
/// weigh equally in the eviction decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Lookup,
    Scan,
    Index,
    Unknown,
}

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// History of access timestamps (most recent at back, at most k entries)
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Returns the backward k-distance from the current timestamp.
    /// None means fewer than k recorded accesses (+inf distance).
    fn k_distance(&self, current_timestamp: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(current_timestamp - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// LRU-K replacement policy.
///
/// The replacer evicts the evictable frame whose backward k-distance is the
/// maximum over all frames, where backward k-distance is the difference
/// between the current timestamp and the timestamp of the k-th most recent
/// access.
///
/// A frame with fewer than k historical accesses has +inf backward
/// k-distance. If multiple frames have +inf backward k-distance, the frame
/// with the oldest earliest-access timestamp is evicted first.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    num_frames: usize,
    /// Logical clock (monotonically increasing)
    current_timestamp: AtomicU64,
    /// Access information for each frame
    frame_info: Mutex<HashMap<FrameId, FrameAccessInfo>>,
    /// Number of evictable frames
    num_evictable: Mutex<usize>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and frame count.
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            num_frames,
            current_timestamp: AtomicU64::new(0),
            frame_info: Mutex::new(HashMap::new()),
            num_evictable: Mutex::new(0),
        }
    }

    /// Evicts the frame with the largest backward k-distance, removing its
    /// access history. Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut frame_info = self.frame_info.lock();
        let mut num_evictable = self.num_evictable.lock();

        if *num_evictable == 0 {
            return None;
        }

        let current_ts = self.current_timestamp.load(Ordering::Relaxed);

        let mut victim: Option<FrameId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest_ts: Option<Timestamp> = None;

        for (frame_id, info) in frame_info.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(current_ts, self.k);
            let earliest_ts = info.earliest_timestamp();

            let should_replace = match (victim_k_dist, k_dist) {
                // Current victim has +inf, candidate is finite
                (None, Some(_)) => false,
                // Candidate has +inf, current victim is finite
                (Some(_), None) => true,
                // Both +inf: older earliest access wins
                (None, None) => match (victim_earliest_ts, earliest_ts) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                // Both finite: larger k-distance wins
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || should_replace {
                victim = Some(*frame_id);
                victim_k_dist = k_dist;
                victim_earliest_ts = earliest_ts;
            }
        }

        if let Some(frame_id) = victim {
            frame_info.remove(&frame_id);
            *num_evictable -= 1;
        }

        victim
    }

    /// Records that the given frame was accessed at the current timestamp,
    /// creating its history entry if absent.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is outside `[0, num_frames)`.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id {frame_id} out of range (num_frames = {})",
            self.num_frames
        );

        let timestamp = self.current_timestamp.fetch_add(1, Ordering::Relaxed);
        let mut frame_info = self.frame_info.lock();

        frame_info
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    /// Sets whether a frame is evictable, maintaining the evictable count.
    /// No-op if the frame is unknown or the flag is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is outside `[0, num_frames)`.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id {frame_id} out of range (num_frames = {})",
            self.num_frames
        );

        let mut frame_info = self.frame_info.lock();
        let mut num_evictable = self.num_evictable.lock();

        if let Some(info) = frame_info.get_mut(&frame_id) {
            if info.is_evictable != is_evictable {
                if is_evictable {
                    *num_evictable += 1;
                } else {
                    *num_evictable -= 1;
                }
                info.is_evictable = is_evictable;
            }
        }
    }

    /// Removes a frame from the replacer along with its access history.
    /// No-op if the frame is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the frame is present but not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut frame_info = self.frame_info.lock();
        let mut num_evictable = self.num_evictable.lock();

        if let Some(info) = frame_info.get(&frame_id) {
            assert!(
                info.is_evictable,
                "cannot remove non-evictable frame {frame_id}"
            );
            frame_info.remove(&frame_id);
            *num_evictable -= 1;
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        *self.num_evictable.lock()
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
