//! amdgpu DRM fdinfo parser
//!
//! The kernel exposes per-handle accounting in `/proc/<pid>/fdinfo/<fd>` for
//! every open DRM node. Recent amdgpu kernels print lines like:
//! ```text
//! drm-driver:     amdgpu
//! drm-pdev:       0000:03:00.0
//! drm-client-id:  42
//! pasid:  32781
//! drm-memory-vram:        5120 KiB
//! drm-engine-gfx: 1734861298 ns
//! drm-engine-compute:     0 ns
//! drm-engine-dec: 0 ns
//! drm-engine-enc: 0 ns
//! ```
//! Older kernels use `vram mem`, `gfx`, `compute`, `dec` and `enc` instead.
//! Lines that fail to parse are ignored one field at a time.

use crate::types::EngineCounters;

/// Fields recognized in an fdinfo file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Driver,
    ClientId,
    Pasid,
    Vram,
    Gfx,
    Compute,
    Decode,
    Encode,
}

/// Accepted spellings per field: (field, old key, new key)
const FIELD_KEYS: &[(Field, Option<&str>, &str)] = &[
    (Field::Driver, None, "drm-driver"),
    (Field::ClientId, None, "drm-client-id"),
    (Field::Pasid, Some("pasid"), "pasid"),
    (Field::Vram, Some("vram mem"), "drm-memory-vram"),
    (Field::Gfx, Some("gfx"), "drm-engine-gfx"),
    (Field::Compute, Some("compute"), "drm-engine-compute"),
    (Field::Decode, Some("dec"), "drm-engine-dec"),
    (Field::Encode, Some("enc"), "drm-engine-enc"),
];

impl Field {
    fn from_key(key: &str) -> Option<Self> {
        FIELD_KEYS
            .iter()
            .find(|(_, old, new)| *new == key || *old == Some(key))
            .map(|(field, _, _)| *field)
    }
}

/// Accounting data read from one DRM handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAccountingSample {
    /// GPU context identifier (`drm-client-id`)
    pub client_id: Option<u64>,
    /// Process address space identifier
    pub pasid: Option<u64>,
    /// DRM driver name, when the kernel reports it
    pub driver: Option<String>,
    /// Cumulative engine busy time, per field as reported
    pub counters: ReportedCounters,
    /// VRAM resident bytes at read time
    pub vram_bytes: u64,
}

/// Engine counters of one handle; a field is None when missing or malformed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportedCounters {
    /// Graphics engine busy time
    pub gfx_ns: Option<u64>,
    /// Compute engine busy time
    pub compute_ns: Option<u64>,
    /// Video encode engine busy time
    pub encode_ns: Option<u64>,
    /// Video decode engine busy time
    pub decode_ns: Option<u64>,
}

impl ReportedCounters {
    /// Take every field `later` reported, keeping the others
    pub fn update(&mut self, later: &ReportedCounters) {
        self.gfx_ns = later.gfx_ns.or(self.gfx_ns);
        self.compute_ns = later.compute_ns.or(self.compute_ns);
        self.encode_ns = later.encode_ns.or(self.encode_ns);
        self.decode_ns = later.decode_ns.or(self.decode_ns);
    }

    /// Counters with unreported engines read as zero
    pub fn to_counters(&self) -> EngineCounters {
        EngineCounters::new(
            self.gfx_ns.unwrap_or(0),
            self.compute_ns.unwrap_or(0),
            self.encode_ns.unwrap_or(0),
            self.decode_ns.unwrap_or(0),
        )
    }
}

impl RawAccountingSample {
    /// Key identifying the GPU context this sample belongs to
    ///
    /// Kernels without `drm-client-id` fall back to the PASID, then to 0.
    pub fn context_key(&self) -> u64 {
        self.client_id.or(self.pasid).unwrap_or(0)
    }

    /// Returns false only when the handle belongs to another DRM driver
    pub fn is_amdgpu(&self) -> bool {
        self.driver.as_deref().map_or(true, |d| d == "amdgpu")
    }
}

/// A parsed fdinfo file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFdinfo {
    /// Values found in the file
    pub sample: RawAccountingSample,
    /// Whether any engine or memory field parsed
    pub has_signal: bool,
}

/// Parse the full text of one fdinfo file
pub fn parse_fdinfo(text: &str) -> ParsedFdinfo {
    let mut parsed = ParsedFdinfo::default();
    let sample = &mut parsed.sample;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = Field::from_key(key) else {
            continue;
        };
        let value = value.trim_start();

        match field {
            Field::Driver => {
                let driver = value.trim_end();
                if !driver.is_empty() {
                    sample.driver = Some(driver.to_string());
                }
            }
            Field::ClientId => {
                if let Ok(id) = value.trim_end().parse() {
                    sample.client_id = Some(id);
                }
            }
            Field::Pasid => {
                if let Ok(pasid) = value.trim_end().parse() {
                    sample.pasid = Some(pasid);
                }
            }
            Field::Vram => {
                if let Some(kib) = parse_with_unit(value, &["kB", "KiB"]) {
                    sample.vram_bytes = kib.saturating_mul(1024);
                    parsed.has_signal = true;
                }
            }
            Field::Gfx | Field::Compute | Field::Decode | Field::Encode => {
                let Some(ns) = parse_with_unit(value, &["ns"]) else {
                    continue;
                };
                let counters = &mut sample.counters;
                let slot = match field {
                    Field::Gfx => &mut counters.gfx_ns,
                    Field::Compute => &mut counters.compute_ns,
                    Field::Decode => &mut counters.decode_ns,
                    _ => &mut counters.encode_ns,
                };
                *slot = Some(ns);
                parsed.has_signal = true;
            }
        }
    }

    parsed
}

/// Parse `<integer><unit>` where whitespace may separate the two
fn parse_with_unit(value: &str, units: &[&str]) -> Option<u64> {
    let value = value.trim();
    let digits = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if digits == 0 {
        return None;
    }
    let (number, unit) = value.split_at(digits);
    if !units.contains(&unit.trim_start()) {
        return None;
    }
    number.parse().ok()
}

/// Totals of one GPU context after folding its handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTotals {
    /// Context key (see [`RawAccountingSample::context_key`])
    pub context: u64,
    /// Latest cumulative counters read for the context
    pub counters: EngineCounters,
    /// VRAM from the first handle that reported the context
    pub vram_bytes: u64,
}

/// Fold one process's samples on one device so each context counts once
///
/// The first sample of a context is authoritative for VRAM. Engine counters
/// are per-context totals repeated on every handle, so for each engine the
/// latest value that parsed wins. The returned contexts keep first-seen order.
pub fn fold_contexts<I>(samples: I) -> Vec<ContextTotals>
where
    I: IntoIterator<Item = RawAccountingSample>,
{
    let mut folded: Vec<(u64, ReportedCounters, u64)> = Vec::new();

    for sample in samples {
        let key = sample.context_key();
        match folded.iter_mut().find(|(context, _, _)| *context == key) {
            Some((_, counters, _)) => counters.update(&sample.counters),
            None => folded.push((key, sample.counters, sample.vram_bytes)),
        }
    }

    folded
        .into_iter()
        .map(|(context, counters, vram_bytes)| ContextTotals {
            context,
            counters: counters.to_counters(),
            vram_bytes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_FORMAT: &str = "pos:\t0\nflags:\t02100002\nmnt_id:\t24\n\
drm-driver:\tamdgpu\ndrm-pdev:\t0000:03:00.0\ndrm-client-id:\t42\npasid:\t32781\n\
drm-memory-vram:\t5120 KiB\ndrm-memory-gtt:\t2048 KiB\ndrm-engine-gfx:\t1734861298 ns\n\
drm-engine-compute:\t5000 ns\ndrm-engine-dec:\t70 ns\ndrm-engine-enc:\t9 ns\n";

    #[test]
    fn test_parse_new_format() {
        let parsed = parse_fdinfo(NEW_FORMAT);
        assert!(parsed.has_signal);
        let sample = parsed.sample;
        assert_eq!(sample.client_id, Some(42));
        assert_eq!(sample.pasid, Some(32781));
        assert_eq!(sample.driver.as_deref(), Some("amdgpu"));
        assert_eq!(sample.vram_bytes, 5120 * 1024);
        assert_eq!(
            sample.counters.to_counters(),
            EngineCounters::new(1734861298, 5000, 9, 70)
        );
    }

    #[test]
    fn test_old_and_new_spellings_agree() {
        let old = parse_fdinfo("vram mem: 1024 kB\ngfx: 10 ns\ncompute: 20 ns\ndec: 30 ns\nenc: 40 ns\n");
        let new = parse_fdinfo(
            "drm-memory-vram: 1024 KiB\ndrm-engine-gfx: 10 ns\ndrm-engine-compute: 20 ns\n\
drm-engine-dec: 30 ns\ndrm-engine-enc: 40 ns\n",
        );
        assert_eq!(old.sample.vram_bytes, 1_048_576);
        assert_eq!(old, new);
    }

    #[test]
    fn test_wrong_unit_leaves_field_untouched() {
        let parsed = parse_fdinfo("drm-memory-vram: 1024 MB\ndrm-engine-gfx: 5 ns\n");
        assert_eq!(parsed.sample.vram_bytes, 0);
        assert_eq!(parsed.sample.counters.gfx_ns, Some(5));
        assert!(parsed.has_signal);

        let parsed = parse_fdinfo("drm-engine-gfx: 5 us\n");
        assert_eq!(parsed.sample.counters.gfx_ns, None);
        assert!(!parsed.has_signal);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let parsed = parse_fdinfo(
            "drm-client-id: abc\ndrm-engine-gfx\ndrm-engine-gfx: ns\ndrm-engine-dec: 12 ns\ngarbage line\n",
        );
        assert_eq!(parsed.sample.client_id, None);
        assert_eq!(parsed.sample.counters.gfx_ns, None);
        assert_eq!(parsed.sample.counters.decode_ns, Some(12));
        assert!(parsed.has_signal);
    }

    #[test]
    fn test_no_signal() {
        let parsed = parse_fdinfo("pos:\t0\nflags:\t02\ndrm-driver:\tamdgpu\npasid:\t7\n");
        assert!(!parsed.has_signal);
        assert_eq!(parsed.sample.pasid, Some(7));
    }

    #[test]
    fn test_unit_spacing() {
        assert_eq!(parse_with_unit("12ns", &["ns"]), Some(12));
        assert_eq!(parse_with_unit("  12 ns  ", &["ns"]), Some(12));
        assert_eq!(parse_with_unit("12", &["ns"]), None);
        assert_eq!(parse_with_unit("-12 ns", &["ns"]), None);
    }

    #[test]
    fn test_other_driver() {
        let parsed = parse_fdinfo("drm-driver:\ti915\ndrm-engine-gfx: 1 ns\n");
        assert!(!parsed.sample.is_amdgpu());
        assert!(RawAccountingSample::default().is_amdgpu());
    }

    #[test]
    fn test_fold_shared_context_counts_vram_once() {
        let handle = RawAccountingSample {
            client_id: Some(7),
            vram_bytes: 4096,
            counters: parse_fdinfo("drm-engine-gfx: 100 ns\n").sample.counters,
            ..Default::default()
        };
        let later = RawAccountingSample {
            counters: parse_fdinfo("drm-engine-gfx: 150 ns\n").sample.counters,
            vram_bytes: 8192,
            ..handle.clone()
        };
        let contexts = fold_contexts(vec![handle, later]);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].vram_bytes, 4096);
        assert_eq!(contexts[0].counters.gfx_ns, 150);
    }

    #[test]
    fn test_fold_keeps_fields_a_later_handle_garbled() {
        let first = parse_fdinfo(
            "drm-client-id: 7\ndrm-engine-gfx: 500 ns\ndrm-engine-dec: 40 ns\n",
        );
        let second = parse_fdinfo(
            "drm-client-id: 7\ndrm-engine-gfx: garbage\ndrm-engine-dec: 60 ns\n",
        );
        assert!(second.has_signal);

        let contexts = fold_contexts(vec![first.sample, second.sample]);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].counters, EngineCounters::new(500, 0, 0, 60));
    }

    #[test]
    fn test_fold_distinct_contexts() {
        let a = RawAccountingSample {
            client_id: Some(1),
            vram_bytes: 10,
            ..Default::default()
        };
        let b = RawAccountingSample {
            client_id: Some(2),
            vram_bytes: 20,
            ..Default::default()
        };
        let contexts = fold_contexts(vec![a, b]);
        let keys: Vec<u64> = contexts.iter().map(|c| c.context).collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn test_context_key_fallback() {
        let sample = RawAccountingSample {
            pasid: Some(99),
            ..Default::default()
        };
        assert_eq!(sample.context_key(), 99);
        assert_eq!(RawAccountingSample::default().context_key(), 0);
    }
}
