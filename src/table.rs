//! The registry of live flows.
//!
//! Flows are keyed by the client-side 4-tuple; a server-to-client ingress
//! tuple is reversed before lookup so both directions resolve the same
//! entry with one probe. The table is the sole owner of its flows. Idle
//! expiry rides on a time-bucket index walked opportunistically on every
//! `process` call, so reclamation cost tracks the number of expired flows,
//! not the table size.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{self, Write},
    net::IpAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{config::Config, flow::Flow};

/// Payload direction relative to the IMAP conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    C2s,
    /// Server to client.
    S2c,
}

impl Direction {
    /// Short lowercase label for log lines.
    pub fn label(self) -> &'static str {
        match self {
            Direction::C2s => "c2s",
            Direction::S2c => "s2c",
        }
    }
}

/// The normalized 4-tuple identifying a flow: `src` is always the client
/// side.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    /// The same connection seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

/// What `process` did with the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The flow exists and may receive more payloads.
    Active,
    /// A client LOGOUT ended the flow; it has been torn down.
    Closed,
}

#[derive(Debug)]
pub struct FlowTable {
    config: Config,
    flows: HashMap<FlowKey, Flow>,
    /// `last_activity_ms / bucket_interval_ms` → keys last active in that
    /// window. Every live flow is in exactly one bucket.
    buckets: BTreeMap<u64, HashSet<FlowKey>>,
}

impl FlowTable {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            flows: HashMap::new(),
            buckets: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Overrides the idle timeout, in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.config.flow_idle_timeout_ms = timeout_ms;
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn all_flows(&self) -> impl Iterator<Item = (&FlowKey, &Flow)> {
        self.flows.iter()
    }

    /// The flow for an ingress tuple of either direction, if one is live.
    pub fn lookup(&self, direction: Direction, tuple: &FlowKey) -> Option<&Flow> {
        self.flows.get(&normalize(direction, tuple))
    }

    /// Feeds one payload slice into the table at capture time `now_ms`.
    ///
    /// The tuple is normalized to client-side form, the flow is created on
    /// first sight, the payload is appended to the direction's buffer and
    /// every complete unit is parsed out. A parsed client LOGOUT tears the
    /// flow down immediately. Idle flows are reclaimed opportunistically
    /// before returning.
    pub fn process(
        &mut self,
        now_ms: u64,
        direction: Direction,
        tuple: &FlowKey,
        payload: &[u8],
    ) -> ProcessStatus {
        let key = normalize(direction, tuple);

        let buffer_capacity = self.config.buffer_capacity_bytes;
        let mut created = false;
        let flow = self.flows.entry(key).or_insert_with(|| {
            created = true;
            Flow::new(buffer_capacity, now_ms)
        });

        let previous_activity = flow.last_activity_ms();
        let logout = match direction {
            Direction::C2s => {
                flow.append_c2s(payload, now_ms);
                flow.parse_c2s()
            }
            Direction::S2c => {
                flow.append_s2c(payload, now_ms);
                flow.parse_s2c();
                false
            }
        };
        let current_activity = flow.last_activity_ms();

        if created {
            debug!("new flow {:?}", key);
            self.insert_bucket(current_activity, key);
        } else {
            self.rebucket(previous_activity, current_activity, key);
        }

        let status = if logout {
            debug!("client logout, tearing down {:?}", key);
            self.delete(&key);
            ProcessStatus::Closed
        } else {
            ProcessStatus::Active
        };

        self.reclaim_idle(now_ms);

        status
    }

    /// Like [`FlowTable::process`], stamped with the system clock.
    pub fn process_now(
        &mut self,
        direction: Direction,
        tuple: &FlowKey,
        payload: &[u8],
    ) -> ProcessStatus {
        self.process(unix_now_ms(), direction, tuple, payload)
    }

    /// Removes a flow (normalized key) and its bucket entry.
    pub fn delete(&mut self, key: &FlowKey) -> Option<Flow> {
        let flow = self.flows.remove(key)?;
        self.remove_bucket(flow.last_activity_ms(), key);
        Some(flow)
    }

    /// Drops every flow whose idle time exceeds the configured timeout.
    ///
    /// Walks only buckets entirely older than the cutoff and re-checks each
    /// flow's own timestamp, in case a flow was touched but its re-bucketing
    /// raced with this walk.
    pub fn reclaim_idle(&mut self, now_ms: u64) {
        let timeout = self.config.flow_idle_timeout_ms;
        let interval = self.config.bucket_interval_ms.max(1);
        let cutoff_ms = match now_ms.checked_sub(timeout) {
            Some(cutoff) => cutoff,
            None => return,
        };
        let cutoff_bucket = cutoff_ms / interval;

        let expired_buckets: Vec<u64> = self
            .buckets
            .range(..=cutoff_bucket)
            .map(|(&bucket, _)| bucket)
            .collect();

        for bucket in expired_buckets {
            let Some(keys) = self.buckets.remove(&bucket) else {
                continue;
            };

            for key in keys {
                let expired = self
                    .flows
                    .get(&key)
                    .map(|flow| flow.is_timeout(now_ms, timeout))
                    .unwrap_or(false);

                if expired {
                    warn!("reclaiming idle flow {:?}", key);
                    self.flows.remove(&key);
                } else if let Some(flow) = self.flows.get(&key) {
                    // Touched but still filed under the stale bucket.
                    self.insert_bucket(flow.last_activity_ms(), key);
                }
            }
        }
    }

    /// Dumps every live flow to `sink`.
    pub fn emit_all<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        for (key, flow) in &self.flows {
            writeln!(
                sink,
                "=== flow {}:{} -> {}:{} ===",
                key.src_ip, key.src_port, key.dst_ip, key.dst_port
            )?;
            flow.emit(sink)?;
        }

        Ok(())
    }

    fn bucket_of(&self, activity_ms: u64) -> u64 {
        activity_ms / self.config.bucket_interval_ms.max(1)
    }

    fn insert_bucket(&mut self, activity_ms: u64, key: FlowKey) {
        let bucket = self.bucket_of(activity_ms);
        self.buckets.entry(bucket).or_default().insert(key);
    }

    fn remove_bucket(&mut self, activity_ms: u64, key: &FlowKey) {
        let bucket = self.bucket_of(activity_ms);
        if let Some(keys) = self.buckets.get_mut(&bucket) {
            keys.remove(key);
            if keys.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
    }

    fn rebucket(&mut self, previous_ms: u64, current_ms: u64, key: FlowKey) {
        let previous = self.bucket_of(previous_ms);
        let current = self.bucket_of(current_ms);
        if previous != current {
            self.remove_bucket(previous_ms, &key);
            self.insert_bucket(current_ms, key);
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Brings an ingress tuple into client-side form.
fn normalize(direction: Direction, tuple: &FlowKey) -> FlowKey {
    match direction {
        Direction::C2s => *tuple,
        Direction::S2c => tuple.reversed(),
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FlowKey {
        FlowKey::new(
            "192.168.1.100".parse().unwrap(),
            12345,
            "10.0.0.1".parse().unwrap(),
            143,
        )
    }

    fn other_key() -> FlowKey {
        FlowKey::new(
            "192.168.1.101".parse().unwrap(),
            54321,
            "10.0.0.1".parse().unwrap(),
            143,
        )
    }

    #[test]
    fn test_both_directions_share_one_flow() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::C2s, &key(), b"a1 LOGIN user pass\r\n");
        table.process(1, Direction::S2c, &key().reversed(), b"a1 OK LOGIN completed\r\n");

        assert_eq!(table.flow_count(), 1);
        let flow = table.lookup(Direction::C2s, &key()).unwrap();
        assert_eq!(flow.c2s_messages().len(), 1);
        assert_eq!(flow.s2c_messages().len(), 1);
    }

    #[test]
    fn test_server_first_packet_creates_same_flow() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::S2c, &key().reversed(), b"* OK ready\r\n");
        table.process(1, Direction::C2s, &key(), b"a1 NOOP\r\n");
        assert_eq!(table.flow_count(), 1);
    }

    #[test]
    fn test_logout_tears_down_immediately() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::C2s, &key(), b"a1 NOOP\r\n");
        assert_eq!(table.flow_count(), 1);

        let status = table.process(1, Direction::C2s, &key(), b"a6 logout\r\n");
        assert_eq!(status, ProcessStatus::Closed);
        assert_eq!(table.flow_count(), 0);
        assert!(table.lookup(Direction::C2s, &key()).is_none());
        assert_eq!(table.bucket_count(), 0);
    }

    #[test]
    fn test_idle_reclamation() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::C2s, &key(), b"a1 NOOP\r\n");
        assert_eq!(table.flow_count(), 1);

        // Idle past the timeout; activity on another flow sweeps it out.
        table.process(120_001, Direction::C2s, &other_key(), b"b1 NOOP\r\n");
        assert_eq!(table.flow_count(), 1);
        assert!(table.lookup(Direction::C2s, &key()).is_none());
        assert!(table.lookup(Direction::C2s, &other_key()).is_some());
        // Only the survivor's bucket remains.
        assert_eq!(table.bucket_count(), 1);
    }

    #[test]
    fn test_active_flow_survives_reclamation() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::C2s, &key(), b"a1 NOOP\r\n");
        table.process(100_000, Direction::C2s, &key(), b"a2 NOOP\r\n");
        table.process(130_000, Direction::C2s, &other_key(), b"b1 NOOP\r\n");

        // Refreshed at t=100s, so not idle at t=130s.
        assert_eq!(table.flow_count(), 2);
    }

    #[test]
    fn test_set_timeout() {
        let mut table = FlowTable::with_defaults();
        table.set_timeout(5_000);
        table.process(0, Direction::C2s, &key(), b"a1 NOOP\r\n");
        table.process(5_002, Direction::C2s, &other_key(), b"b1 NOOP\r\n");
        assert!(table.lookup(Direction::C2s, &key()).is_none());
    }

    #[test]
    fn test_delete() {
        let mut table = FlowTable::with_defaults();
        table.process(0, Direction::C2s, &key(), b"a1 NOOP\r\n");
        assert!(table.delete(&key()).is_some());
        assert_eq!(table.flow_count(), 0);
        assert!(table.delete(&key()).is_none());
    }
}
