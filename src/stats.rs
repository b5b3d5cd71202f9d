//! Run-summary statistics (§6): aggregates per-domain counters into the CSV
//! report the CLI writes at the end of a trace replay. No crate in this
//! codebase's dependency stack carries a CSV writer, so the format is
//! hand-rolled, matching the flat key=value texture [`crate::config`] uses
//! for input.

use std::fmt::Write as _;
use std::io;

use crate::amu::domain::AddressMappingDomain;
use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub stream: u16,
    pub cmt_hits: u64,
    pub cmt_misses: u64,
    pub gmt_write_count: u64,
    pub read_before_write_count: u64,
    pub update_read_count: u64,
    pub total_page_write_no: u64,
    pub gc_page_write_no: u64,
    pub dedup_rate: f64,
    pub exhausted_write_count: u64,
}

impl StreamSummary {
    pub fn cmt_hit_ratio(&self) -> f64 {
        let total = self.cmt_hits + self.cmt_misses;
        if total == 0 {
            0.0
        } else {
            self.cmt_hits as f64 / total as f64
        }
    }
}

impl From<&AddressMappingDomain> for StreamSummary {
    fn from(d: &AddressMappingDomain) -> Self {
        StreamSummary {
            stream: d.stream.0,
            cmt_hits: d.cmt_hits,
            cmt_misses: d.cmt_misses,
            gmt_write_count: d.gmt_write_count,
            read_before_write_count: d.read_before_write_count,
            update_read_count: d.update_read_count,
            total_page_write_no: d.total_page_write_no,
            gc_page_write_no: d.gc_page_write_no,
            dedup_rate: d.dedup.dedup_rate(),
            exhausted_write_count: d.exhausted_write_count,
        }
    }
}

pub struct RunSummary {
    pub flash_space_gb: f64,
    pub page_size_in_bytes: u32,
    pub streams: Vec<StreamSummary>,
}

impl RunSummary {
    pub fn collect(config: &Config, domains: &[AddressMappingDomain]) -> Self {
        let total_pages: u64 = config
            .streams
            .iter()
            .map(|s| s.geometry.channel_ids.len() as u64
                * s.geometry.chip_ids.len() as u64
                * s.geometry.die_ids.len() as u64
                * s.geometry.plane_ids.len() as u64
                * config.total_physical_pages_per_plane())
            .sum();
        let flash_space_gb =
            (total_pages * config.page_size_in_bytes as u64) as f64 / (1024.0 * 1024.0 * 1024.0);

        RunSummary {
            flash_space_gb,
            page_size_in_bytes: config.page_size_in_bytes,
            streams: domains.iter().map(StreamSummary::from).collect(),
        }
    }

    pub fn total_writes_issued(&self) -> u64 {
        self.streams.iter().map(|s| s.total_page_write_no).sum()
    }

    pub fn total_gmt_writes(&self) -> u64 {
        self.streams.iter().map(|s| s.gmt_write_count).sum()
    }

    pub fn total_read_before_write(&self) -> u64 {
        self.streams.iter().map(|s| s.read_before_write_count).sum()
    }

    pub fn total_update_reads(&self) -> u64 {
        self.streams.iter().map(|s| s.update_read_count).sum()
    }

    pub fn total_exhausted_writes(&self) -> u64 {
        self.streams.iter().map(|s| s.exhausted_write_count).sum()
    }

    /// Render the §6 summary as CSV: one header row, one row per stream,
    /// plus a trailing `ALL` aggregate row.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "stream,flash_space_gb,page_size_bytes,cmt_hit_ratio,dedup_rate,total_page_writes,gmt_write_count,read_before_write_count,update_read_count,gc_page_write_no,exhausted_write_count"
        );
        for s in &self.streams {
            let _ = writeln!(
                out,
                "{},{:.3},{},{:.4},{:.4},{},{},{},{},{},{}",
                s.stream,
                self.flash_space_gb,
                self.page_size_in_bytes,
                s.cmt_hit_ratio(),
                s.dedup_rate,
                s.total_page_write_no,
                s.gmt_write_count,
                s.read_before_write_count,
                s.update_read_count,
                s.gc_page_write_no,
                s.exhausted_write_count,
            );
        }
        let total_hits: u64 = self.streams.iter().map(|s| s.cmt_hits).sum();
        let total_misses: u64 = self.streams.iter().map(|s| s.cmt_misses).sum();
        let overall_hit_ratio = if total_hits + total_misses == 0 {
            0.0
        } else {
            total_hits as f64 / (total_hits + total_misses) as f64
        };
        let _ = writeln!(
            out,
            "ALL,{:.3},{},{:.4},,{},{},{},{},,{}",
            self.flash_space_gb,
            self.page_size_in_bytes,
            overall_hit_ratio,
            self.total_writes_issued(),
            self.total_gmt_writes(),
            self.total_read_before_write(),
            self.total_update_reads(),
            self.total_exhausted_writes(),
        );
        out
    }

    pub fn write_csv(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(self.to_csv().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amu::dedup::{Deduplicator, EmptyFingerprintSource};
    use crate::amu::geometry::StreamGeometry;
    use crate::config::StreamConfig;
    use crate::types::StreamId;

    fn one_stream_config() -> Config {
        Config::builder()
            .page_size_in_bytes(4096)
            .block_count_per_plane(2)
            .page_count_per_block(4)
            .add_stream(StreamConfig {
                id: StreamId(0),
                geometry: StreamGeometry {
                    channel_ids: vec![0],
                    chip_ids: vec![0],
                    die_ids: vec![0],
                    plane_ids: vec![0],
                },
                total_logical_pages: 16,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn csv_has_one_row_per_stream_plus_total() {
        let config = one_stream_config();
        let domain = AddressMappingDomain::new(
            StreamId(0),
            16,
            4,
            4,
            config.streams[0].geometry.clone(),
            Deduplicator::new(Box::new(EmptyFingerprintSource)),
            None,
        );
        let summary = RunSummary::collect(&config, std::slice::from_ref(&domain));
        let csv = summary.to_csv();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.starts_with("stream,"));
    }
}
