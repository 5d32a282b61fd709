//! Segment-loading collaborator. The fault handler asks a `SegmentSource`
//! to populate a frame with one page of a loadable segment; everything it
//! needs to know about segment layout is in the static `SegmentInfo`
//! metadata. `ProgramImage` is the in-memory implementation used by the
//! demo binary and the tests.

use crate::constants::PAGE_SIZE;

/// Static per-segment metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub first_vpn: usize,
    pub num_pages: usize,
    pub read_only: bool,
}

impl SegmentInfo {
    /// Whether `vpn` falls inside this segment.
    pub fn contains(&self, vpn: usize) -> bool {
        vpn >= self.first_vpn && vpn < self.first_vpn + self.num_pages
    }
}

/// Supplies page contents for the loadable segments of an address space.
pub trait SegmentSource: Send + Sync {
    fn segments(&self) -> &[SegmentInfo];

    /// Populate `dst` (one page) with page `page` of segment `segment`,
    /// where `page` is relative to the segment start. Trusted to fill
    /// exactly one page's worth of bytes.
    fn load_page(&self, segment: usize, page: usize, dst: &mut [u8]);

    /// Find the segment covering `vpn`, as (segment index, segment-relative
    /// page, read-only flag).
    fn locate(&self, vpn: usize) -> Option<(usize, usize, bool)> {
        self.segments()
            .iter()
            .enumerate()
            .find(|(_, info)| info.contains(vpn))
            .map(|(idx, info)| (idx, vpn - info.first_vpn, info.read_only))
    }

    /// One past the last vpn covered by any segment.
    fn num_pages(&self) -> usize {
        self.segments()
            .iter()
            .map(|info| info.first_vpn + info.num_pages)
            .max()
            .unwrap_or(0)
    }
}

/// An executable image held in memory: consecutive segments starting at
/// vpn 0, each padded out to whole pages.
#[derive(Default)]
pub struct ProgramImage {
    infos: Vec<SegmentInfo>,
    data: Vec<Vec<u8>>,
}

impl ProgramImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment holding `data`, placed right after the previous
    /// segment. Returns the segment's first vpn.
    pub fn push_segment(&mut self, data: &[u8], read_only: bool) -> usize {
        let first_vpn = SegmentSource::num_pages(self);
        let num_pages = data.len().div_ceil(PAGE_SIZE).max(1);
        self.infos.push(SegmentInfo { first_vpn, num_pages, read_only });
        self.data.push(data.to_vec());
        first_vpn
    }
}

impl SegmentSource for ProgramImage {
    fn segments(&self) -> &[SegmentInfo] {
        &self.infos
    }

    fn load_page(&self, segment: usize, page: usize, dst: &mut [u8]) {
        assert!(page < self.infos[segment].num_pages, "page outside segment");
        let data = &self.data[segment];
        let start = (page * PAGE_SIZE).min(data.len());
        let end = ((page + 1) * PAGE_SIZE).min(data.len());
        dst[..end - start].copy_from_slice(&data[start..end]);
        dst[end - start..].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_placed_consecutively() {
        let mut image = ProgramImage::new();
        let code = image.push_segment(&vec![1u8; 2 * PAGE_SIZE], true);
        let data = image.push_segment(&vec![2u8; PAGE_SIZE / 2], false);

        assert_eq!(code, 0);
        assert_eq!(data, 2);
        assert_eq!(image.segments().len(), 2);
        assert_eq!(image.num_pages(), 3);
    }

    #[test]
    fn test_locate_maps_vpn_to_segment_page() {
        let mut image = ProgramImage::new();
        image.push_segment(&vec![0u8; 2 * PAGE_SIZE], true);
        image.push_segment(&vec![0u8; PAGE_SIZE], false);

        assert_eq!(image.locate(0), Some((0, 0, true)));
        assert_eq!(image.locate(1), Some((0, 1, true)));
        assert_eq!(image.locate(2), Some((1, 0, false)));
        assert_eq!(image.locate(3), None);
    }

    #[test]
    fn test_load_page_zero_pads_short_tail() {
        let mut image = ProgramImage::new();
        image.push_segment(&[7u8; 10], false);

        let mut page = [0xffu8; PAGE_SIZE];
        image.load_page(0, 0, &mut page);
        assert_eq!(&page[..10], &[7u8; 10]);
        assert!(page[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_segment_still_occupies_a_page() {
        let mut image = ProgramImage::new();
        image.push_segment(&[], false);
        assert_eq!(image.num_pages(), 1);

        let mut page = [0xffu8; PAGE_SIZE];
        image.load_page(0, 0, &mut page);
        assert!(page.iter().all(|&b| b == 0));
    }
}
