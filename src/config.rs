//! Simulator configuration (§6 of the specification).
//!
//! Built either programmatically through [`ConfigBuilder`] (teacher-style:
//! chained setters validated once at `build()`) or loaded from a flat
//! `key = value` text file. No crate in this codebase's dependency stack
//! carries a config-file format, so the loader is hand-rolled rather than
//! pulling in an unrelated parser crate.

use std::collections::HashMap;
use std::fmt;

use crate::amu::geometry::{PlaneAllocationScheme, StreamGeometry};
use crate::error::{Result, SimError};
use crate::types::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmtSharingMode {
    /// All streams compete for a single pool of CMT slots.
    Shared,
    /// Each stream owns a disjoint, equally-sized share of CMT capacity.
    EqualSizePartitioning,
}

impl fmt::Display for CmtSharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmtSharingMode::Shared => write!(f, "shared"),
            CmtSharingMode::EqualSizePartitioning => write!(f, "equal-size-partitioning"),
        }
    }
}

/// Per-stream geometry plus the logical page count it addresses.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub id: StreamId,
    pub geometry: StreamGeometry,
    pub total_logical_pages: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ideal_mapping_table: bool,
    pub cmt_capacity_in_bytes: u64,
    pub cmt_entry_size: u32,
    pub translation_entries_per_page: u32,
    pub plane_allocation_scheme: PlaneAllocationScheme,
    pub cmt_sharing_mode: CmtSharingMode,
    pub streams: Vec<StreamConfig>,
    pub block_count_per_plane: u32,
    pub page_count_per_block: u32,
    pub sectors_per_page: u32,
    pub page_size_in_bytes: u32,
    pub overprovisioning_ratio: f64,
    pub fold_large_addresses: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total CMT entry capacity, derived from the configured byte budget
    /// and per-entry size (the original source took entry count directly;
    /// the top-level config here takes bytes, per §6).
    pub fn cmt_capacity_in_entries(&self) -> usize {
        if self.cmt_entry_size == 0 {
            0
        } else {
            (self.cmt_capacity_in_bytes / self.cmt_entry_size as u64) as usize
        }
    }

    pub fn total_physical_pages_per_plane(&self) -> u64 {
        self.block_count_per_plane as u64 * self.page_count_per_block as u64
    }
}

pub struct ConfigBuilder {
    ideal_mapping_table: bool,
    cmt_capacity_in_bytes: u64,
    cmt_entry_size: u32,
    translation_entries_per_page: u32,
    plane_allocation_scheme: PlaneAllocationScheme,
    cmt_sharing_mode: CmtSharingMode,
    streams: Vec<StreamConfig>,
    block_count_per_plane: u32,
    page_count_per_block: u32,
    sectors_per_page: u32,
    page_size_in_bytes: u32,
    overprovisioning_ratio: f64,
    fold_large_addresses: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            ideal_mapping_table: false,
            cmt_capacity_in_bytes: 0,
            cmt_entry_size: 20,
            translation_entries_per_page: 512,
            plane_allocation_scheme: PlaneAllocationScheme::Cwdp,
            cmt_sharing_mode: CmtSharingMode::Shared,
            streams: Vec::new(),
            block_count_per_plane: 256,
            page_count_per_block: 256,
            sectors_per_page: 8,
            page_size_in_bytes: 4096,
            overprovisioning_ratio: 0.07,
            fold_large_addresses: true,
        }
    }
}

impl ConfigBuilder {
    pub fn ideal_mapping_table(mut self, value: bool) -> Self {
        self.ideal_mapping_table = value;
        self
    }

    pub fn cmt_capacity_in_bytes(mut self, value: u64) -> Self {
        self.cmt_capacity_in_bytes = value;
        self
    }

    pub fn cmt_entry_size(mut self, value: u32) -> Self {
        self.cmt_entry_size = value;
        self
    }

    pub fn translation_entries_per_page(mut self, value: u32) -> Self {
        self.translation_entries_per_page = value;
        self
    }

    pub fn plane_allocation_scheme(mut self, value: PlaneAllocationScheme) -> Self {
        self.plane_allocation_scheme = value;
        self
    }

    pub fn cmt_sharing_mode(mut self, value: CmtSharingMode) -> Self {
        self.cmt_sharing_mode = value;
        self
    }

    pub fn add_stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn block_count_per_plane(mut self, value: u32) -> Self {
        self.block_count_per_plane = value;
        self
    }

    pub fn page_count_per_block(mut self, value: u32) -> Self {
        self.page_count_per_block = value;
        self
    }

    pub fn sectors_per_page(mut self, value: u32) -> Self {
        self.sectors_per_page = value;
        self
    }

    pub fn page_size_in_bytes(mut self, value: u32) -> Self {
        self.page_size_in_bytes = value;
        self
    }

    pub fn overprovisioning_ratio(mut self, value: f64) -> Self {
        self.overprovisioning_ratio = value;
        self
    }

    pub fn fold_large_addresses(mut self, value: bool) -> Self {
        self.fold_large_addresses = value;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.streams.is_empty() {
            return Err(SimError::Config("at least one stream must be configured".into()));
        }
        if self.sectors_per_page == 0 || self.sectors_per_page > 64 {
            return Err(SimError::Config(format!(
                "sectors_per_page must be in 1..=64, got {}",
                self.sectors_per_page
            )));
        }
        for stream in &self.streams {
            if stream.geometry.channel_ids.is_empty()
                || stream.geometry.chip_ids.is_empty()
                || stream.geometry.die_ids.is_empty()
                || stream.geometry.plane_ids.is_empty()
            {
                return Err(SimError::Config(format!(
                    "stream {} has an empty channel/chip/die/plane id list",
                    stream.id.0
                )));
            }
        }
        Ok(Config {
            ideal_mapping_table: self.ideal_mapping_table,
            cmt_capacity_in_bytes: self.cmt_capacity_in_bytes,
            cmt_entry_size: self.cmt_entry_size,
            translation_entries_per_page: self.translation_entries_per_page,
            plane_allocation_scheme: self.plane_allocation_scheme,
            cmt_sharing_mode: self.cmt_sharing_mode,
            streams: self.streams,
            block_count_per_plane: self.block_count_per_plane,
            page_count_per_block: self.page_count_per_block,
            sectors_per_page: self.sectors_per_page,
            page_size_in_bytes: self.page_size_in_bytes,
            overprovisioning_ratio: self.overprovisioning_ratio,
            fold_large_addresses: self.fold_large_addresses,
        })
    }
}

/// Parse a flat `key = value` configuration file. Stream-scoped keys are
/// namespaced as `stream.<id>.<field>`; comma-separated lists are used for
/// id sets (`stream.0.channel_ids = 0,1,2,3`).
pub fn parse_config(text: &str) -> Result<Config> {
    let mut scalars: HashMap<String, String> = HashMap::new();
    let mut stream_fields: HashMap<u16, HashMap<String, String>> = HashMap::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            SimError::Config(format!("malformed config line {}: {raw_line:?}", lineno + 1))
        })?;
        let key = key.trim();
        let value = value.trim().to_string();

        if let Some(rest) = key.strip_prefix("stream.") {
            let (id_str, field) = rest.split_once('.').ok_or_else(|| {
                SimError::Config(format!("malformed stream key {key:?} on line {}", lineno + 1))
            })?;
            let id: u16 = id_str
                .parse()
                .map_err(|_| SimError::Config(format!("invalid stream id {id_str:?}")))?;
            stream_fields.entry(id).or_default().insert(field.to_string(), value);
        } else {
            scalars.insert(key.to_string(), value);
        }
    }

    let mut builder = Config::builder();

    if let Some(v) = scalars.get("ideal_mapping_table") {
        builder = builder.ideal_mapping_table(parse_bool(v)?);
    }
    if let Some(v) = scalars.get("cmt_capacity_in_bytes") {
        builder = builder.cmt_capacity_in_bytes(parse_u64(v)?);
    }
    if let Some(v) = scalars.get("cmt_entry_size") {
        builder = builder.cmt_entry_size(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("translation_entries_per_page") {
        builder = builder.translation_entries_per_page(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("plane_allocation_scheme") {
        builder = builder.plane_allocation_scheme(PlaneAllocationScheme::from_name(v)?);
    }
    if let Some(v) = scalars.get("cmt_sharing_mode") {
        builder = builder.cmt_sharing_mode(match v.to_ascii_uppercase().as_str() {
            "SHARED" => CmtSharingMode::Shared,
            "EQUAL_SIZE_PARTITIONING" => CmtSharingMode::EqualSizePartitioning,
            other => return Err(SimError::Config(format!("unknown cmt_sharing_mode {other:?}"))),
        });
    }
    if let Some(v) = scalars.get("block_count_per_plane") {
        builder = builder.block_count_per_plane(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("page_count_per_block") {
        builder = builder.page_count_per_block(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("sectors_per_page") {
        builder = builder.sectors_per_page(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("page_size_in_bytes") {
        builder = builder.page_size_in_bytes(parse_u32(v)?);
    }
    if let Some(v) = scalars.get("overprovisioning_ratio") {
        builder = builder.overprovisioning_ratio(
            v.parse().map_err(|_| SimError::Config(format!("invalid float {v:?}")))?,
        );
    }
    if let Some(v) = scalars.get("fold_large_addresses") {
        builder = builder.fold_large_addresses(parse_bool(v)?);
    }

    let mut ids: Vec<u16> = stream_fields.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let fields = &stream_fields[&id];
        let geometry = StreamGeometry {
            channel_ids: parse_id_list(fields.get("channel_ids"))?,
            chip_ids: parse_id_list(fields.get("chip_ids"))?,
            die_ids: parse_id_list(fields.get("die_ids"))?,
            plane_ids: parse_id_list(fields.get("plane_ids"))?,
        };
        let total_logical_pages = fields
            .get("total_logical_pages")
            .map(|v| parse_u64(v))
            .transpose()?
            .unwrap_or(0);
        builder = builder.add_stream(StreamConfig {
            id: StreamId(id),
            geometry,
            total_logical_pages,
        });
    }

    builder.build()
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(SimError::Config(format!("invalid boolean {other:?}"))),
    }
}

fn parse_u32(v: &str) -> Result<u32> {
    v.parse().map_err(|_| SimError::Config(format!("invalid integer {v:?}")))
}

fn parse_u64(v: &str) -> Result<u64> {
    v.parse().map_err(|_| SimError::Config(format!("invalid integer {v:?}")))
}

fn parse_id_list(v: Option<&String>) -> Result<Vec<u32>> {
    match v {
        None => Ok(Vec::new()),
        Some(v) => v
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u32>().map_err(|_| SimError::Config(format!("invalid id {s:?}"))))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_empty_stream_list() {
        let err = Config::builder().build().unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn parses_flat_config_text() {
        let text = r#"
            # sample config
            ideal_mapping_table = false
            cmt_capacity_in_bytes = 40
            cmt_entry_size = 20
            cmt_sharing_mode = SHARED
            plane_allocation_scheme = CWDP
            sectors_per_page = 8

            stream.0.channel_ids = 0,1
            stream.0.chip_ids = 0
            stream.0.die_ids = 0
            stream.0.plane_ids = 0,1
            stream.0.total_logical_pages = 64
        "#;
        let cfg = parse_config(text).unwrap();
        assert_eq!(cfg.streams.len(), 1);
        assert_eq!(cfg.cmt_capacity_in_entries(), 2);
        assert_eq!(cfg.streams[0].geometry.channel_ids, vec![0, 1]);
    }
}
