use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Kind of access being recorded. Only bookkeeping today; a smarter policy
/// could weight scans differently from point lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// The K most recent access timestamps, most recent at the back
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

    /// Backward k-distance relative to `now`. None means fewer than k
    /// recorded accesses, i.e. +inf distance.
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_timestamp(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

/// Mutable replacer state, all behind one mutex.
struct ReplacerState {
    /// Access information per tracked frame
    frames: HashMap<FrameId, FrameAccessInfo>,
    /// Number of evictable frames
    num_evictable: usize,
    /// Logical clock; bumped on every record_access
    current_timestamp: Timestamp,
}

/// LRU-K replacement policy.
///
/// Evicts the evictable frame whose backward k-distance is the maximum over
/// all frames, where backward k-distance is the difference between the
/// current timestamp and the timestamp of the kth previous access.
///
/// A frame with fewer than k historical accesses has +inf backward
/// k-distance. When multiple frames have +inf backward k-distance, the frame
/// with the oldest earliest timestamp is evicted (classical LRU over the
/// sparse-history set).
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame
    /// count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0, "k must be at least 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                num_evictable: 0,
                current_timestamp: 0,
            }),
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance,
    /// removing its entry. Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        if state.num_evictable == 0 {
            return None;
        }

        let now = state.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest: Option<Timestamp> = None;

        for (&frame_id, info) in state.frames.iter() {
            if !info.is_evictable {
                continue;
            }

            let k_dist = info.k_distance(now, self.k);
            let earliest = info.earliest_timestamp();

            let replace = match (victim_k_dist, k_dist) {
                // Candidate has +inf distance, current victim does not
                (Some(_), None) => true,
                // Current victim has +inf distance, candidate does not
                (None, Some(_)) => false,
                // Both +inf: older earliest access wins
                (None, None) => match (victim_earliest, earliest) {
                    (Some(v), Some(c)) => c < v,
                    (None, Some(_)) => true,
                    _ => false,
                },
                // Both finite: larger k-distance wins
                (Some(v), Some(c)) => c > v,
            };

            if victim.is_none() || replace {
                victim = Some(frame_id);
                victim_k_dist = k_dist;
                victim_earliest = earliest;
            }
        }

        if let Some(frame_id) = victim {
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
        }

        victim
    }

    /// Records an access to the given frame at the current timestamp,
    /// creating a (non-evictable) entry on first sight.
    ///
    /// Panics if `frame_id` is beyond the replacer's capacity; that is a
    /// contract violation by the caller.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "frame id {} out of range for replacer of {} frames",
            frame_id,
            self.max_frames
        );

        let mut state = self.state.lock();
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;

        state
            .frames
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    /// Sets whether a frame is evictable, adjusting the evictable count.
    /// Unknown frame ids and no-op toggles are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        let state = &mut *state;
        if let Some(info) = state.frames.get_mut(&frame_id) {
            if info.is_evictable != is_evictable {
                info.is_evictable = is_evictable;
                if is_evictable {
                    state.num_evictable += 1;
                } else {
                    state.num_evictable -= 1;
                }
            }
        }
    }

    /// Removes a frame's entry and access history, regardless of its
    /// k-distance. Unknown frame ids are ignored.
    ///
    /// Panics when called on a tracked frame that is not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let state = &mut *state;

        if let Some(info) = state.frames.get(&frame_id) {
            assert!(
                info.is_evictable,
                "cannot remove non-evictable frame {}",
                frame_id
            );
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
