//! Bounded per-device histories

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AcquisitionSettings;
use crate::events::BurstRecord;
use crate::sdr::IqBlock;

/// FIFO that evicts its oldest entry once `capacity` is reached
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `item`, returning the evicted entry if any
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// One waterfall line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallRow {
    pub timestamp: DateTime<Utc>,
    pub power: Vec<f32>,
}

/// Everything a device remembers about past blocks
#[derive(Debug)]
pub(crate) struct DeviceHistory {
    pub blocks: BoundedHistory<IqBlock>,
    pub bursts: BoundedHistory<BurstRecord>,
    pub waterfall: BoundedHistory<WaterfallRow>,
}

impl DeviceHistory {
    pub fn new(settings: &AcquisitionSettings) -> Self {
        Self {
            blocks: BoundedHistory::new(settings.sample_history),
            bursts: BoundedHistory::new(settings.burst_history),
            waterfall: BoundedHistory::new(settings.waterfall_rows),
        }
    }
}
