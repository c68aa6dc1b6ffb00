use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::time::Instant;

mod controller;

pub use controller::{ProfileChangeFeed, TrackedPosition, TrackerStatus, TrackingController};

/// One scheduled poll. Ordered by due time for the min-heap.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DueEntry {
    due: Instant,
    employee_id: String,
    /// Entries whose generation no longer matches the employee's current one
    /// are discarded on pop; bumping the generation is how cancellation and
    /// rescheduling invalidate stale heap entries without an O(n) sweep.
    generation: u64,
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.employee_id.cmp(&other.employee_id))
    }
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of next-due polls, one logical timer per employee without one OS
/// timer object per employee.
#[derive(Default)]
pub(crate) struct PollSchedule {
    heap: BinaryHeap<Reverse<DueEntry>>,
    generations: HashMap<String, u64>,
}

impl PollSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) an employee's next poll. Any earlier entry
    /// for the same employee is superseded.
    pub fn schedule(&mut self, employee_id: &str, due: Instant) -> u64 {
        let generation = self
            .generations
            .entry(employee_id.to_string())
            .and_modify(|g| *g += 1)
            .or_insert(1);
        let generation = *generation;

        self.heap.push(Reverse(DueEntry {
            due,
            employee_id: employee_id.to_string(),
            generation,
        }));
        generation
    }

    /// Drop an employee from the schedule. Heap entries are invalidated
    /// lazily via the generation bump.
    pub fn cancel(&mut self, employee_id: &str) {
        self.generations
            .entry(employee_id.to_string())
            .and_modify(|g| *g += 1);
    }

    pub fn current_generation(&self, employee_id: &str) -> Option<u64> {
        self.generations.get(employee_id).copied()
    }

    /// Earliest live due time, skimming invalidated entries off the top.
    pub fn next_due(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.generations.get(&entry.employee_id) == Some(&entry.generation) {
                return Some(entry.due);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every live entry due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(String, u64)> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            if self.generations.get(&entry.employee_id) == Some(&entry.generation) {
                due.push((entry.employee_id, entry.generation));
            }
        }
        due
    }

    pub fn is_empty(&mut self) -> bool {
        self.next_due().is_none()
    }
}

/// Effective interval after consecutive failures: the nominal interval
/// doubles per failure up to `cap_factor` times nominal, and resets to
/// nominal on the next success.
pub(crate) fn backoff_interval_secs(nominal_secs: u64, failures: u32, cap_factor: u32) -> u64 {
    let multiplier = 1u64
        .checked_shl(failures)
        .unwrap_or(u64::MAX)
        .min(cap_factor.max(1) as u64);
    nominal_secs.saturating_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_to_cap_and_no_further() {
        assert_eq!(backoff_interval_secs(180, 0, 8), 180);
        assert_eq!(backoff_interval_secs(180, 1, 8), 360);
        assert_eq!(backoff_interval_secs(180, 2, 8), 720);
        assert_eq!(backoff_interval_secs(180, 3, 8), 1440);
        // capped at 8x nominal from here on
        assert_eq!(backoff_interval_secs(180, 4, 8), 1440);
        assert_eq!(backoff_interval_secs(180, 30, 8), 1440);
    }

    #[test]
    fn pops_in_due_order() {
        let mut schedule = PollSchedule::new();
        let base = Instant::now();

        schedule.schedule("late", base + Duration::from_secs(30));
        schedule.schedule("early", base + Duration::from_secs(10));
        schedule.schedule("middle", base + Duration::from_secs(20));

        let due = schedule.pop_due(base + Duration::from_secs(60));
        let order: Vec<&str> = due.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, ["early", "middle", "late"]);
    }

    #[test]
    fn only_entries_at_or_before_now_pop() {
        let mut schedule = PollSchedule::new();
        let base = Instant::now();

        schedule.schedule("soon", base + Duration::from_secs(5));
        schedule.schedule("later", base + Duration::from_secs(500));

        let due = schedule.pop_due(base + Duration::from_secs(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "soon");
        assert_eq!(schedule.next_due(), Some(base + Duration::from_secs(500)));
    }

    #[test]
    fn reschedule_supersedes_older_entry() {
        let mut schedule = PollSchedule::new();
        let base = Instant::now();

        schedule.schedule("E1", base + Duration::from_secs(10));
        schedule.schedule("E1", base + Duration::from_secs(40));

        // The 10 s entry is stale; nothing pops before 40 s.
        assert!(schedule.pop_due(base + Duration::from_secs(20)).is_empty());
        let due = schedule.pop_due(base + Duration::from_secs(50));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn cancel_invalidates_scheduled_entry() {
        let mut schedule = PollSchedule::new();
        let base = Instant::now();

        schedule.schedule("E1", base + Duration::from_secs(10));
        schedule.cancel("E1");

        assert!(schedule.pop_due(base + Duration::from_secs(60)).is_empty());
        assert!(schedule.is_empty());
    }
}
