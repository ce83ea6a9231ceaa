//! Single-pass consumer of one monitor-stats JSON document.
//!
//! The document is walked with `DeserializeSeed` visitors so that one pass
//! over the input produces the node record, the per-backend records and the
//! stat_commit error side-table. Unknown keys anywhere in the document are
//! skipped; a type mismatch on a recognised field rejects the whole
//! document.

use std::collections::HashMap;
use std::fmt;

use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

use common::constants::{LOOPBACK_INTERFACE, ROFS_ERROR_CODE};

use crate::model::stats::{BackendStat, NodeStat};

/// Everything extracted from one monitor-stats document.
#[derive(Debug, Default)]
pub struct ParsedStats {
    pub node: NodeStat,
    pub backends: Vec<BackendStat>,
    /// backend_id -> accumulated count of read-only filesystem commit errors
    pub rofs_errors: HashMap<u64, u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("malformed monitor-stats document: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn parse_monitor_stats(data: &[u8]) -> Result<ParsedStats, ParseError> {
    let mut de = serde_json::Deserializer::from_slice(data);
    let mut parsed = DocumentSeed.deserialize(&mut de)?;
    de.end()?;

    // The node timestamp applies to every backend in the same document.
    for bstat in &mut parsed.backends {
        bstat.ts_sec = parsed.node.ts_sec;
        bstat.ts_usec = parsed.node.ts_usec;
    }

    Ok(parsed)
}

struct DocumentSeed;

impl<'de> DeserializeSeed<'de> for DocumentSeed {
    type Value = ParsedStats;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed {
    type Value = ParsedStats;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a monitor-stats object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut parsed = ParsedStats::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "timestamp" => {
                    let (sec, usec) = map.next_value_seed(TimevalSeed)?;
                    parsed.node.ts_sec = sec;
                    parsed.node.ts_usec = usec;
                }
                "procfs" => map.next_value_seed(ProcfsSeed(&mut parsed.node))?,
                "backends" => map.next_value_seed(BackendsSeed(&mut parsed.backends))?,
                "stats" => map.next_value_seed(RofsTableSeed(&mut parsed.rofs_errors))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(parsed)
    }
}

/// `{"tv_sec": U, "tv_usec": U}`
struct TimevalSeed;

impl<'de> DeserializeSeed<'de> for TimevalSeed {
    type Value = (u64, u64);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for TimevalSeed {
    type Value = (u64, u64);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a timeval object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut sec = 0;
        let mut usec = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "tv_sec" => sec = map.next_value()?,
                "tv_usec" => usec = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok((sec, usec))
    }
}

/// `procfs`: load average plus per-interface traffic counters.
struct ProcfsSeed<'a>(&'a mut NodeStat);

impl<'de> DeserializeSeed<'de> for ProcfsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ProcfsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a procfs object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "vm" => map.next_value_seed(VmSeed(self.0))?,
                "net" => map.next_value_seed(NetSeed(self.0))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct VmSeed<'a>(&'a mut NodeStat);

impl<'de> DeserializeSeed<'de> for VmSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for VmSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a procfs.vm object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "la" => self.0.la1 = map.next_value_seed(LaSeed)?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// `la` is an array of three samples; only the 1-minute value is kept.
struct LaSeed;

impl<'de> DeserializeSeed<'de> for LaSeed {
    type Value = u64;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for LaSeed {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a load average array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let la1 = seq.next_element::<u64>()?.unwrap_or(0);
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(la1)
    }
}

struct NetSeed<'a>(&'a mut NodeStat);

impl<'de> DeserializeSeed<'de> for NetSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for NetSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a procfs.net object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "net_interfaces" => map.next_value_seed(NetInterfacesSeed(self.0))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// Sums `receive.bytes`/`transmit.bytes` over every interface except the
/// loopback.
struct NetInterfacesSeed<'a>(&'a mut NodeStat);

impl<'de> DeserializeSeed<'de> for NetInterfacesSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for NetInterfacesSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a net_interfaces object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(ifname) = map.next_key::<String>()? {
            let (rx, tx) = map.next_value_seed(InterfaceSeed)?;
            if ifname != LOOPBACK_INTERFACE {
                self.0.rx_bytes += rx;
                self.0.tx_bytes += tx;
            }
        }
        Ok(())
    }
}

struct InterfaceSeed;

impl<'de> DeserializeSeed<'de> for InterfaceSeed {
    type Value = (u64, u64);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for InterfaceSeed {
    type Value = (u64, u64);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an interface counters object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut rx = 0;
        let mut tx = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "receive" => rx = map.next_value_seed(BytesSeed)?,
                "transmit" => tx = map.next_value_seed(BytesSeed)?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok((rx, tx))
    }
}

struct BytesSeed;

impl<'de> DeserializeSeed<'de> for BytesSeed {
    type Value = u64;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BytesSeed {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a byte counter object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut bytes = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "bytes" => bytes = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(bytes)
    }
}

/// `backends`: one entry per backend id.
struct BackendsSeed<'a>(&'a mut Vec<BackendStat>);

impl<'de> DeserializeSeed<'de> for BackendsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BackendsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a backends object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_key::<IgnoredAny>()?.is_some() {
            let stat = map.next_value_seed(BackendEntrySeed)?;
            self.0.push(stat);
        }
        Ok(())
    }
}

struct BackendEntrySeed;

impl<'de> DeserializeSeed<'de> for BackendEntrySeed {
    type Value = BackendStat;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BackendEntrySeed {
    type Value = BackendStat;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a backend entry")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut stat = BackendStat::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "backend_id" => stat.backend_id = map.next_value()?,
                "backend" => map.next_value_seed(BackendInnerSeed(&mut stat))?,
                "commands" => map.next_value_seed(CommandsSeed(&mut stat))?,
                "io" => map.next_value_seed(IoSeed(&mut stat))?,
                "status" => map.next_value_seed(StatusSeed(&mut stat))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(stat)
    }
}

struct BackendInnerSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for BackendInnerSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BackendInnerSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a backend stats object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "base_stats" => map.next_value_seed(BaseStatsSeed(self.0))?,
                "config" => map.next_value_seed(ConfigSeed(self.0))?,
                "dstat" => map.next_value_seed(DstatSeed(self.0))?,
                "summary_stats" => map.next_value_seed(SummaryStatsSeed(self.0))?,
                "vfs" => map.next_value_seed(VfsSeed(self.0))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// `base_stats` maps blob file names to their sizes; the maximum base_size
/// across entries is kept.
struct BaseStatsSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for BaseStatsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BaseStatsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base_stats object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_key::<IgnoredAny>()?.is_some() {
            let base_size = map.next_value_seed(BaseSizeSeed)?;
            if base_size > self.0.max_blob_base_size {
                self.0.max_blob_base_size = base_size;
            }
        }
        Ok(())
    }
}

struct BaseSizeSeed;

impl<'de> DeserializeSeed<'de> for BaseSizeSeed {
    type Value = u64;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BaseSizeSeed {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base_stats entry")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut base_size = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "base_size" => base_size = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(base_size)
    }
}

struct ConfigSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for ConfigSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ConfigSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a backend config object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "blob_size" => self.0.blob_size = map.next_value()?,
                "blob_size_limit" => self.0.blob_size_limit = map.next_value()?,
                "data" => self.0.data_path = map.next_value()?,
                "file" => self.0.file_path = map.next_value()?,
                "group" => self.0.group = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct DstatSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for DstatSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DstatSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a dstat object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "error" => self.0.dstat_error = map.next_value()?,
                "io_ticks" => self.0.io_ticks = map.next_value()?,
                "read_ios" => self.0.read_ios = map.next_value()?,
                "read_sectors" => self.0.read_sectors = map.next_value()?,
                "read_ticks" => self.0.read_ticks = map.next_value()?,
                "write_ios" => self.0.write_ios = map.next_value()?,
                "write_ticks" => self.0.write_ticks = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct SummaryStatsSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for SummaryStatsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SummaryStatsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a summary_stats object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "base_size" => self.0.base_size = map.next_value()?,
                "records_removed" => self.0.records_removed = map.next_value()?,
                "records_removed_size" => self.0.records_removed_size = map.next_value()?,
                "records_total" => self.0.records_total = map.next_value()?,
                "want_defrag" => self.0.want_defrag = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct VfsSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for VfsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for VfsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a vfs object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "bavail" => self.0.vfs_bavail = map.next_value()?,
                "blocks" => self.0.vfs_blocks = map.next_value()?,
                "bsize" => self.0.vfs_bsize = map.next_value()?,
                "error" => self.0.vfs_error = map.next_value()?,
                "fsid" => self.0.fsid = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// `commands`: READ and WRITE traffic is folded into the per-backend
/// cache/disk size and time counters; LOOKUP is skipped.
struct CommandsSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for CommandsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for CommandsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a commands object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "READ" => {
                    let sources = map.next_value_seed(CommandSourcesSeed)?;
                    self.0.ell_cache_read_size += sources.cache_size;
                    self.0.ell_cache_read_time += sources.cache_time;
                    self.0.ell_disk_read_size += sources.disk_size;
                    self.0.ell_disk_read_time += sources.disk_time;
                }
                "WRITE" => {
                    let sources = map.next_value_seed(CommandSourcesSeed)?;
                    self.0.ell_cache_write_size += sources.cache_size;
                    self.0.ell_cache_write_time += sources.cache_time;
                    self.0.ell_disk_write_size += sources.disk_size;
                    self.0.ell_disk_write_time += sources.disk_time;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct CommandSources {
    cache_size: u64,
    cache_time: u64,
    disk_size: u64,
    disk_time: u64,
}

struct CommandSourcesSeed;

impl<'de> DeserializeSeed<'de> for CommandSourcesSeed {
    type Value = CommandSources;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for CommandSourcesSeed {
    type Value = CommandSources;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a command sources object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut sources = CommandSources::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "cache" => {
                    let (size, time) = map.next_value_seed(CommandOriginsSeed)?;
                    sources.cache_size += size;
                    sources.cache_time += time;
                }
                "disk" => {
                    let (size, time) = map.next_value_seed(CommandOriginsSeed)?;
                    sources.disk_size += size;
                    sources.disk_time += time;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(sources)
    }
}

/// Sums `internal` and `outside` size/time pairs.
struct CommandOriginsSeed;

impl<'de> DeserializeSeed<'de> for CommandOriginsSeed {
    type Value = (u64, u64);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for CommandOriginsSeed {
    type Value = (u64, u64);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a command origins object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut size = 0;
        let mut time = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "internal" | "outside" => {
                    let (s, t) = map.next_value_seed(SizeTimeSeed)?;
                    size += s;
                    time += t;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok((size, time))
    }
}

struct SizeTimeSeed;

impl<'de> DeserializeSeed<'de> for SizeTimeSeed {
    type Value = (u64, u64);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SizeTimeSeed {
    type Value = (u64, u64);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a size/time pair")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut size = 0;
        let mut time = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "size" => size = map.next_value()?,
                "time" => time = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok((size, time))
    }
}

struct IoSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for IoSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for IoSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an io queues object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "blocking" => self.0.io_blocking_size = map.next_value_seed(CurrentSizeSeed)?,
                "nonblocking" => self.0.io_nonblocking_size = map.next_value_seed(CurrentSizeSeed)?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

struct CurrentSizeSeed;

impl<'de> DeserializeSeed<'de> for CurrentSizeSeed {
    type Value = u64;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for CurrentSizeSeed {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an io queue object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut current_size = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "current_size" => current_size = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(current_size)
    }
}

struct StatusSeed<'a>(&'a mut BackendStat);

impl<'de> DeserializeSeed<'de> for StatusSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for StatusSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a backend status object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "defrag_state" => self.0.defrag_state = map.next_value()?,
                "last_start" => {
                    let (sec, usec) = map.next_value_seed(TimevalSeed)?;
                    self.0.last_start_ts_sec = sec;
                    self.0.last_start_ts_usec = usec;
                }
                "read_only" => self.0.read_only = map.next_value()?,
                "state" => self.0.state = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// Top-level `stats` object: only `eblob.<id>.disk.stat_commit.errors.30`
/// entries contribute; every other key is skipped.
struct RofsTableSeed<'a>(&'a mut HashMap<u64, u64>);

impl<'de> DeserializeSeed<'de> for RofsTableSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RofsTableSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a stats object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match parse_stat_commit_key(&key) {
                Some((backend_id, ROFS_ERROR_CODE)) => {
                    let count = map.next_value_seed(CountSeed)?;
                    *self.0.entry(backend_id).or_insert(0) += count;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// `eblob.<backend_id>.disk.stat_commit.errors.<code>` -> (backend_id, code)
fn parse_stat_commit_key(key: &str) -> Option<(u64, u64)> {
    let rest = key.strip_prefix("eblob.")?;
    let (backend_id, rest) = rest.split_once('.')?;
    let code = rest.strip_prefix("disk.stat_commit.errors.")?;
    Some((backend_id.parse().ok()?, code.parse().ok()?))
}

struct CountSeed;

impl<'de> DeserializeSeed<'de> for CountSeed {
    type Value = u64;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for CountSeed {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an error counter object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut count = 0;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "count" => count = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_commit_key_forms() {
        assert_eq!(
            parse_stat_commit_key("eblob.112.disk.stat_commit.errors.30"),
            Some((112, 30))
        );
        assert_eq!(
            parse_stat_commit_key("eblob.111.disk.stat_commit.errors.9"),
            Some((111, 9))
        );
        assert_eq!(parse_stat_commit_key("eblob.112.disk.write_errors.30"), None);
        assert_eq!(parse_stat_commit_key("cache.112.disk.stat_commit.errors.30"), None);
        assert_eq!(parse_stat_commit_key("eblob.x.disk.stat_commit.errors.30"), None);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let json = br#"{
            "unknown_top": {"nested": [1, 2, {"x": "y"}]},
            "timestamp": {"tv_sec": 10, "tv_usec": 20, "tv_extra": 30},
            "backends": {}
        }"#;
        let parsed = parse_monitor_stats(json).unwrap();
        assert_eq!(parsed.node.ts_sec, 10);
        assert_eq!(parsed.node.ts_usec, 20);
        assert!(parsed.backends.is_empty());
    }

    #[test]
    fn type_mismatch_rejects_document() {
        let json = br#"{"timestamp": {"tv_sec": "not a number"}}"#;
        assert!(parse_monitor_stats(json).is_err());
    }

    #[test]
    fn trailing_garbage_rejects_document() {
        let json = br#"{"timestamp": {"tv_sec": 1}} trailing"#;
        assert!(parse_monitor_stats(json).is_err());
    }
}
