//! Vertical layout of a continuous page column.

use pdf_engine::PageSize;

/// Page heights in pixels stacked top to bottom with a fixed gap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    heights: Vec<f32>,
    gap: f32,
}

impl PageLayout {
    pub fn new(heights: Vec<f32>, gap: f32) -> Self {
        Self { heights, gap: gap.max(0.0) }
    }

    /// Layout of pages rasterized at `scale`.
    pub fn from_page_sizes(sizes: &[PageSize], scale: f32, gap: f32) -> Self {
        let heights = sizes.iter().map(|size| size.viewport(scale).height_px as f32).collect();
        Self::new(heights, gap)
    }

    pub fn page_count(&self) -> u32 {
        self.heights.len() as u32
    }

    pub fn content_height(&self) -> f32 {
        if self.heights.is_empty() {
            return 0.0;
        }

        let gaps = self.gap * (self.heights.len() - 1) as f32;
        self.heights.iter().sum::<f32>() + gaps
    }

    /// Largest scroll offset that still fills a viewport of `viewport_height`.
    pub fn max_scroll_offset(&self, viewport_height: f32) -> f32 {
        (self.content_height() - viewport_height.max(0.0)).max(0.0)
    }

    /// 1-based page under `offset`. Offsets inside a gap belong to the next page.
    pub fn page_at_offset(&self, offset: f32) -> Option<u32> {
        if self.heights.is_empty() {
            return None;
        }

        let mut cursor = 0.0;
        for (index, height) in self.heights.iter().enumerate() {
            let page_end = cursor + height;
            if offset <= page_end {
                return Some(index as u32 + 1);
            }
            cursor = page_end + self.gap;
        }

        Some(self.page_count())
    }

    /// Offset of the top edge of a 1-based page.
    pub fn page_start_offset(&self, page: u32) -> Option<f32> {
        let index = page.checked_sub(1)? as usize;
        if index >= self.heights.len() {
            return None;
        }

        Some(self.heights[..index].iter().map(|height| height + self.gap).sum())
    }

    /// Page whose body holds the middle of the viewport.
    pub fn current_page(&self, offset: f32, viewport_height: f32) -> Option<u32> {
        self.page_at_offset((offset + viewport_height / 2.0).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_pages() -> PageLayout {
        PageLayout::new(vec![1000.0, 1000.0, 1000.0], 100.0)
    }

    #[test]
    fn content_height_includes_gaps_between_pages() {
        assert_eq!(three_pages().content_height(), 3200.0);
        assert_eq!(PageLayout::default().content_height(), 0.0);
        assert_eq!(three_pages().max_scroll_offset(800.0), 2400.0);
        assert_eq!(three_pages().max_scroll_offset(5000.0), 0.0);
    }

    #[test]
    fn current_page_uses_viewport_center() {
        assert_eq!(three_pages().current_page(1200.0, 1000.0), Some(2));
        assert_eq!(three_pages().current_page(99_999.0, 1000.0), Some(3));
    }

    #[test]
    fn page_start_offsets_stack_with_gap() {
        let layout = three_pages();
        assert_eq!(layout.page_start_offset(1), Some(0.0));
        assert_eq!(layout.page_start_offset(3), Some(2200.0));
        assert_eq!(layout.page_start_offset(0), None);
        assert_eq!(layout.page_start_offset(4), None);
    }

    #[test]
    fn layout_from_page_sizes_uses_raster_scale() {
        let letter = PageSize { width_pt: 612.0, height_pt: 792.0 };
        let layout = PageLayout::from_page_sizes(&[letter, letter], 0.5, 16.0);
        assert_eq!(layout.content_height(), 396.0 * 2.0 + 16.0);
    }
}
