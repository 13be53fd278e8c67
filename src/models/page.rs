use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: first_page(),
            size: default_size(),
        }
    }
}

impl PageParams {
    pub fn limit(&self) -> u32 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.limit().saturating_mul(self.page.max(1) - 1)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, params: PageParams) -> Self {
        let size = params.limit();
        Self {
            items,
            total,
            page: params.page.max(1),
            size,
            pages: total.div_ceil(size as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_one_based() {
        let params = PageParams { page: 3, size: 20 };
        assert_eq!(params.offset(), 40);
        assert_eq!(PageParams { page: 0, size: 20 }.offset(), 0);
    }

    #[test]
    fn size_is_clamped() {
        assert_eq!(PageParams { page: 1, size: 0 }.limit(), 1);
        assert_eq!(PageParams { page: 1, size: 10_000 }.limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn page_count_rounds_up() {
        let page = Page::new(vec![1, 2], 41, PageParams { page: 1, size: 20 });
        assert_eq!(page.pages, 3);
        let empty: Page<u8> = Page::new(vec![], 0, PageParams::default());
        assert_eq!(empty.pages, 0);
    }
}
