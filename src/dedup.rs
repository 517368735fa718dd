//! Bounded cache of recently processed message ids.
//!
//! Lark delivers events at least once and retries when the webhook is slow
//! to acknowledge, so every inbound message id is offered here before any
//! side effect is issued.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::DedupConfig;

/// What the cache knew about a message id when it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Not seen within the window; now recorded.
    First,
    /// Already recorded. `since_first` is the age of the first delivery.
    Repeat { since_first: Duration },
}

/// Ids in arrival order. `arrived` and `order` always hold the same keys.
#[derive(Debug, Default)]
struct ArrivalWindow {
    order: VecDeque<String>,
    arrived: HashMap<String, Instant>,
}

impl ArrivalWindow {
    fn pop_oldest(&mut self) {
        if let Some(id) = self.order.pop_front() {
            self.arrived.remove(&id);
        }
    }

    /// Arrival order is time order, so expired ids sit at the front.
    fn expire(&mut self, now: Instant, ttl: Duration) {
        while let Some(oldest) = self.order.front() {
            let expired = self
                .arrived
                .get(oldest)
                .is_none_or(|at| now.duration_since(*at) >= ttl);
            if !expired {
                break;
            }
            self.pop_oldest();
        }
    }
}

#[derive(Debug)]
pub struct MessageDedup {
    ttl: Duration,
    capacity: usize,
    window: Mutex<ArrivalWindow>,
}

impl MessageDedup {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            window: Mutex::new(ArrivalWindow::default()),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_keys)
    }

    /// Offer `message_id`; a first delivery is recorded in the same critical
    /// section, so concurrent duplicates see exactly one `First`.
    pub fn observe(&self, message_id: &str) -> Delivery {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.expire(now, self.ttl);

        if let Some(at) = window.arrived.get(message_id) {
            return Delivery::Repeat {
                since_first: now.duration_since(*at),
            };
        }

        while window.order.len() >= self.capacity {
            window.pop_oldest();
        }
        window.order.push_back(message_id.to_owned());
        window.arrived.insert(message_id.to_owned(), now);
        Delivery::First
    }

    pub fn len(&self) -> usize {
        self.window.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
