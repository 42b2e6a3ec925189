use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub type RoomId = i64;
pub type ZoneId = i64;

/// A raw sensor sample as posted by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub guid: String,
    pub co2: i64,
    pub tvoc: i64,
    #[serde(rename = "batteryCharge")]
    pub battery_charge: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub key: String,
    pub reading: Reading,
}

/// Row handed to the durable store by the flush cycle. The staging key doubles
/// as the idempotency key of the committed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReading {
    pub staging_key: String,
    pub guid: String,
    pub co2: i64,
    pub tvoc: i64,
    pub battery_charge: i64,
    pub committed_at: DateTime<Utc>,
}

impl NewReading {
    pub fn from_entry(entry: StagingEntry, committed_at: DateTime<Utc>) -> Self {
        let StagingEntry { key, reading } = entry;
        Self {
            staging_key: key,
            guid: reading.guid,
            co2: reading.co2,
            tvoc: reading.tvoc,
            battery_charge: reading.battery_charge,
            committed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DurableReading {
    pub id: i64,
    pub staging_key: Option<String>,
    pub guid: String,
    pub co2: i64,
    pub tvoc: i64,
    pub battery_charge: i64,
    pub committed_at: DateTime<Utc>,
}

/// Running sums for one sensor (or a merged set of sensors).
///
/// Sums are 128-bit: `count` readings of at most `i64::MAX` each cannot
/// overflow them, and their mean always fits back into an `i64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadingTotals {
    pub count: i64,
    pub co2_sum: i128,
    pub tvoc_sum: i128,
}

impl ReadingTotals {
    pub fn add(&mut self, co2: i64, tvoc: i64) {
        self.count += 1;
        self.co2_sum += i128::from(co2);
        self.tvoc_sum += i128::from(tvoc);
    }

    pub fn merge(&mut self, other: &ReadingTotals) {
        self.count += other.count;
        self.co2_sum += other.co2_sum;
        self.tvoc_sum += other.tvoc_sum;
    }

    /// Integer means of co2 and tvoc, truncated toward zero. `None` when empty.
    pub fn averages(&self) -> Option<(i64, i64)> {
        if self.count <= 0 {
            return None;
        }
        let count = i128::from(self.count);
        let co2 = i64::try_from(self.co2_sum / count).ok()?;
        let tvoc = i64::try_from(self.tvoc_sum / count).ok()?;
        Some((co2, tvoc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatistic {
    pub co2: i64,
    pub tvoc: i64,
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatistic {
    #[serde(rename = "zoneID")]
    pub zone_id: ZoneId,
    pub rooms: Vec<RoomStatistic>,
}

/// Mints staging keys that are unique per ingestion event.
///
/// Layout: `<unix micros:020>-<instance:8 hex>-<seq:012>-<guid>`. The per-process
/// sequence separates events landing in the same microsecond; the random
/// instance id separates processes sharing one staging table.
#[derive(Debug)]
pub struct StagingKeyGen {
    instance: String,
    seq: AtomicU64,
}

impl StagingKeyGen {
    pub fn new() -> Self {
        let instance = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            instance,
            seq: AtomicU64::new(0),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn next_key(&self, guid: &str, at: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{:020}-{}-{:012}-{}",
            at.timestamp_micros().max(0),
            self.instance,
            seq,
            guid
        )
    }
}

impl Default for StagingKeyGen {
    fn default() -> Self {
        Self::new()
    }
}
