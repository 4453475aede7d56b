//! Guard-region scanning for buffer-overrun detection.
//!
//! In corruption-check mode every payload is flanked by zero-initialized
//! guard regions. A non-zero guard byte means something wrote outside the
//! payload bounds; the scan attributes it to the allocation's recorded
//! call site.

use std::fmt;

use crate::core::record::{AllocationRecord, BlockLayout};

/// Which guard region a violation was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardRegion {
    /// The guard bytes directly before the payload.
    Before,
    /// The guard bytes directly after `payload + size`.
    After,
}

impl fmt::Display for GuardRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardRegion::Before => f.write_str("before"),
            GuardRegion::After => f.write_str("after"),
        }
    }
}

/// A clobbered guard byte attributed to its allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardViolation {
    /// Which side of the payload was clobbered.
    pub region: GuardRegion,

    /// Payload address of the allocation, as handed to the caller.
    pub address: usize,

    /// Recorded payload size.
    pub size: usize,

    /// Recorded call site.
    pub file: &'static str,

    /// Recorded call-site line.
    pub line: u32,

    /// Offset of the first clobbered byte within its guard region.
    pub offset: usize,
}

/// Scan both guard regions of one record.
///
/// Reads only record fields and guard bytes, never the list links, so it
/// is safe to run outside the list lock. Reports the first clobbered byte
/// per region, one warning line each.
///
/// # Safety
///
/// `rec` must point at a live record produced by a tracker using `layout`.
pub(crate) unsafe fn scan_record(
    layout: BlockLayout,
    rec: *const AllocationRecord,
) -> Vec<GuardViolation> {
    let payload = (*rec).payload;
    let size = (*rec).size;
    let mut violations = Vec::new();

    let leading = layout.leading_guard(payload);
    if let Some(offset) = first_nonzero(leading, layout.guard()) {
        violations.push(report(rec, GuardRegion::Before, offset));
    }

    let trailing = payload.add(size);
    if let Some(offset) = first_nonzero(trailing, layout.guard()) {
        violations.push(report(rec, GuardRegion::After, offset));
    }

    violations
}

unsafe fn report(
    rec: *const AllocationRecord,
    region: GuardRegion,
    offset: usize,
) -> GuardViolation {
    let violation = GuardViolation {
        region,
        address: (*rec).payload as usize,
        size: (*rec).size,
        file: (*rec).file,
        line: (*rec).line,
        offset,
    };
    log::warn!(
        "[memory] corruption: {} address {:#x}, size {}, {}:{} (guard byte {} clobbered)",
        violation.region,
        violation.address,
        violation.size,
        violation.file,
        violation.line,
        violation.offset,
    );
    violation
}

/// Find the offset of the first non-zero byte in a region, if any.
unsafe fn first_nonzero(start: *const u8, len: usize) -> Option<usize> {
    for i in 0..len {
        if *start.add(i) != 0 {
            return Some(i);
        }
    }
    None
}
