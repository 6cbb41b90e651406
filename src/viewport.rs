use std::ops::Range;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub offset: usize,
    pub height: usize,
}

impl Viewport {
    pub fn new(height: usize) -> Self {
        Self { offset: 0, height }
    }

    pub fn with_height(self, height: usize) -> Self {
        Self { height, ..self }
    }

    pub fn window(&self, len: usize) -> Range<usize> {
        let start = self.offset.min(len);
        let end = start.saturating_add(self.height).min(len);
        start..end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.offset && index < self.offset.saturating_add(self.height)
    }

    /// Scrolls as little as possible to bring `selected` into view. The window
    /// never runs past the last row.
    pub fn scroll_to(&self, selected: usize, len: usize) -> Self {
        if len == 0 || self.height == 0 {
            return Self {
                offset: 0,
                height: self.height,
            };
        }
        let selected = selected.min(len - 1);
        let offset = if self.contains(selected) {
            self.offset
        } else if selected < self.offset {
            selected
        } else {
            selected + 1 - self.height
        };
        let max_offset = len.saturating_sub(self.height);
        Self {
            offset: offset.min(max_offset),
            height: self.height,
        }
    }
}

pub fn row_top(index: usize, row_height: usize) -> usize {
    index * row_height
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_clamped_to_length() {
        let viewport = Viewport {
            offset: 8,
            height: 5,
        };
        assert_eq!(viewport.window(10), 8..10);
        assert_eq!(viewport.window(3), 3..3);
        assert_eq!(Viewport::new(4).window(100), 0..4);
    }

    #[test]
    fn scroll_down_keeps_selection_on_last_line() {
        let viewport = Viewport::new(5).scroll_to(7, 20);
        assert_eq!(viewport.offset, 3);
        assert!(viewport.contains(7));
        assert!(!viewport.contains(8));
    }

    #[test]
    fn scroll_up_moves_window_to_selection() {
        let viewport = Viewport {
            offset: 10,
            height: 5,
        }
        .scroll_to(4, 20);
        assert_eq!(viewport.offset, 4);
    }

    #[test]
    fn selection_inside_window_does_not_scroll() {
        let viewport = Viewport {
            offset: 2,
            height: 5,
        };
        assert_eq!(viewport.scroll_to(4, 20), viewport);
    }

    #[test]
    fn shrinking_list_pulls_window_back() {
        let viewport = Viewport {
            offset: 15,
            height: 5,
        }
        .scroll_to(16, 17);
        assert_eq!(viewport.offset, 12);
        assert_eq!(viewport.window(17), 12..17);
    }

    #[test]
    fn empty_list_resets_offset() {
        let viewport = Viewport {
            offset: 9,
            height: 5,
        }
        .scroll_to(0, 0);
        assert_eq!(viewport.offset, 0);
        assert!(viewport.window(0).is_empty());
    }

    #[test]
    fn resizing_keeps_offset() {
        let viewport = Viewport {
            offset: 3,
            height: 5,
        }
        .with_height(10);
        assert_eq!(viewport.offset, 3);
        assert_eq!(viewport.height, 10);
    }

    #[test]
    fn row_top_is_index_times_height() {
        assert_eq!(row_top(0, 24), 0);
        assert_eq!(row_top(7, 24), 168);
    }
}
