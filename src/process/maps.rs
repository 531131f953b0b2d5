//! `/proc/<pid>/maps` parsing
//!
//! Each record reads `start-end perms offset dev inode [path]`, with the
//! path running to the end of the line (it may contain spaces).

use crate::config::MapsConfig;
use crate::error::{ElfError, Result};
use std::path::Path;
use tracing::{debug, trace};

/// One mapped region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegion {
    pub start: u64,
    pub end: u64,
    /// Permission string, e.g. `r-xp`.
    pub perms: String,
    pub offset: u64,
    pub device: String,
    pub inode: u64,
    /// Backing path or pseudo-name (`[vdso]`, `[heap]`); empty for anonymous maps.
    pub name: String,
}

impl MapRegion {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn perm(&self, index: usize, flag: u8) -> bool {
        self.perms.as_bytes().get(index) == Some(&flag)
    }

    pub fn is_readable(&self) -> bool {
        self.perm(0, b'r')
    }

    pub fn is_writable(&self) -> bool {
        self.perm(1, b'w')
    }

    pub fn is_executable(&self) -> bool {
        self.perm(2, b'x')
    }

    pub fn is_private(&self) -> bool {
        self.perm(3, b'p')
    }

    /// Backing file, if the name is an absolute path.
    pub fn path(&self) -> Option<&Path> {
        self.name.starts_with('/').then(|| Path::new(self.name.as_str()))
    }
}

fn field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    let (value, tail) = trimmed.split_at(end);
    *rest = tail;
    Some(value)
}

fn hex(text: &str) -> Option<u64> {
    u64::from_str_radix(text, 16).ok()
}

/// Parse one maps record.
pub fn parse_line(line: &str) -> Option<MapRegion> {
    let mut rest = line;
    let range = field(&mut rest)?;
    let perms = field(&mut rest)?;
    let offset = field(&mut rest)?;
    let device = field(&mut rest)?;
    let inode = field(&mut rest)?;

    let (start, end) = range.split_once('-')?;
    Some(MapRegion {
        start: hex(start)?,
        end: hex(end)?,
        perms: perms.to_string(),
        offset: hex(offset)?,
        device: device.to_string(),
        inode: inode.parse().ok()?,
        name: rest.trim().to_string(),
    })
}

/// Parse every well-formed record; malformed lines are skipped.
pub fn parse_maps(text: &str) -> Vec<MapRegion> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let region = parse_line(line);
            if region.is_none() {
                trace!(line, "Skipping malformed maps record");
            }
            region
        })
        .collect()
}

/// Merge each region into its predecessor when both carry the same name and
/// the predecessor ends where it starts.
pub fn coalesce(regions: Vec<MapRegion>) -> Vec<MapRegion> {
    let mut merged: Vec<MapRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(prev) if prev.name == region.name && prev.end == region.start => {
                prev.end = region.end;
            }
            _ => merged.push(region),
        }
    }
    merged
}

/// Apply the execute filter, then coalescing, as configured.
pub fn retain_regions(regions: Vec<MapRegion>, config: &MapsConfig) -> Vec<MapRegion> {
    let before = regions.len();
    let kept: Vec<MapRegion> = if config.executable_only {
        regions.into_iter().filter(|r| r.is_executable()).collect()
    } else {
        regions
    };
    let kept = if config.coalesce { coalesce(kept) } else { kept };
    debug!(before, after = kept.len(), "Filtered memory map");
    kept
}

/// Read the calling process's memory map.
pub fn read_self_maps() -> Result<String> {
    std::fs::read_to_string("/proc/self/maps").map_err(ElfError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
55d4c8a00000-55d4c8a02000 r--p 00000000 fd:01 1311003                    /usr/bin/cat
55d4c8a02000-55d4c8a07000 r-xp 00002000 fd:01 1311003                    /usr/bin/cat
7f1e2c000000-7f1e2c021000 rw-p 00000000 00:00 0
7f1e2d400000-7f1e2d428000 r--p 00000000 fd:01 1319632                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f1e2d428000-7f1e2d5bd000 r-xp 00028000 fd:01 1319632                    /usr/lib/x86_64-linux-gnu/libc.so.6
7ffd1a5f2000-7ffd1a5f4000 r-xp 00000000 00:00 0                          [vdso]
";

    fn region(start: u64, end: u64, perms: &str, name: &str) -> MapRegion {
        MapRegion {
            start,
            end,
            perms: perms.to_string(),
            offset: 0,
            device: "00:00".to_string(),
            inode: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_sample() {
        let regions = parse_maps(SAMPLE);
        assert_eq!(regions.len(), 6);
        let r = &regions[1];
        assert_eq!(r.start, 0x55d4c8a02000);
        assert_eq!(r.end, 0x55d4c8a07000);
        assert_eq!(r.offset, 0x2000);
        assert_eq!(r.device, "fd:01");
        assert_eq!(r.inode, 1311003);
        assert_eq!(r.name, "/usr/bin/cat");
        assert!(r.is_executable() && r.is_readable() && r.is_private());
        assert!(!r.is_writable());
        assert_eq!(regions[2].name, "");
        assert_eq!(regions[2].path(), None);
        assert_eq!(regions[5].path(), None);
    }

    #[test]
    fn test_path_with_spaces() {
        let line = "00400000-00401000 r-xp 00000000 08:01 42   /opt/my app/bin file (deleted)";
        let r = parse_line(line).unwrap();
        assert_eq!(r.name, "/opt/my app/bin file (deleted)");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let regions = parse_maps("garbage\n00400000-00401000 r-xp\n\n");
        assert!(regions.is_empty());
    }

    #[test]
    fn test_coalesce_contiguous_same_name() {
        let merged = coalesce(vec![
            region(0x1000, 0x2000, "r-xp", "/lib/a.so"),
            region(0x2000, 0x3000, "r-xp", "/lib/a.so"),
        ]);
        assert_eq!(merged, vec![region(0x1000, 0x3000, "r-xp", "/lib/a.so")]);
    }

    #[test]
    fn test_no_coalesce_across_gap_or_name() {
        let regions = vec![
            region(0x1000, 0x2000, "r-xp", "/lib/a.so"),
            region(0x2001, 0x3000, "r-xp", "/lib/a.so"),
            region(0x3000, 0x4000, "r-xp", "/lib/b.so"),
        ];
        assert_eq!(coalesce(regions.clone()), regions);
    }

    #[test]
    fn test_retain_executable_only() {
        let kept = retain_regions(parse_maps(SAMPLE), &MapsConfig::default());
        let names: Vec<_> = kept.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/usr/bin/cat",
                "/usr/lib/x86_64-linux-gnu/libc.so.6",
                "[vdso]"
            ]
        );
    }

    #[test]
    fn test_retain_all_coalesces_split_objects() {
        let config = MapsConfig {
            executable_only: false,
            coalesce: true,
        };
        let kept = retain_regions(parse_maps(SAMPLE), &config);
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].start, 0x55d4c8a00000);
        assert_eq!(kept[0].end, 0x55d4c8a07000);
    }
}
