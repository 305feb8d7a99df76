//! Page enumeration and object numbering.
//!
//! Every object number is known before the first byte goes out: the scanner
//! classifies each page up front and lays its objects out in a
//! [`PageLayout`], so pages can reference objects written after them.

use crate::classify::{classify, PagePlan};
use crate::container::{Container, Directory, FILETYPE_PAGE};
use crate::error::Result;
use crate::options::ConvertOptions;

/// Catalog, info and page tree objects.
pub const CATALOG_OBJECT: u32 = 1;
pub const INFO_OBJECT: u32 = 2;
pub const PAGES_OBJECT: u32 = 3;

/// Object numbers of one page, in the order they are written.
///
/// Page, contents, contents length, then an optional graphics state with its
/// transfer functions, an optional palette, an optional ICC profile, and
/// finally an image and its length for every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub first: u32,
    pub tiles: u32,
    pub transfer_count: u32,
    pub palette: bool,
    pub icc: bool,
}

impl PageLayout {
    pub fn new(first: u32, plan: &PagePlan) -> Self {
        Self {
            first,
            tiles: plan.tile_count(),
            transfer_count: plan.transfer.len() as u32,
            palette: plan.color.palette.is_some(),
            icc: plan.color.icc,
        }
    }

    pub fn page(&self) -> u32 {
        self.first
    }

    pub fn contents(&self) -> u32 {
        self.first + 1
    }

    pub fn contents_length(&self) -> u32 {
        self.first + 2
    }

    fn transfer_objects(&self) -> u32 {
        if self.transfer_count > 0 {
            1 + self.transfer_count
        } else {
            0
        }
    }

    pub fn ext_gstate(&self) -> Option<u32> {
        (self.transfer_count > 0).then_some(self.first + 3)
    }

    /// Transfer function stream `channel`.
    pub fn transfer(&self, channel: u32) -> u32 {
        self.first + 4 + channel
    }

    pub fn palette(&self) -> Option<u32> {
        self.palette.then_some(self.first + 3 + self.transfer_objects())
    }

    pub fn icc(&self) -> Option<u32> {
        self.icc
            .then_some(self.first + 3 + self.transfer_objects() + u32::from(self.palette))
    }

    /// Objects between the contents length and the first image.
    pub fn extra(&self) -> u32 {
        self.transfer_objects() + u32::from(self.palette) + u32::from(self.icc)
    }

    pub fn image(&self, tile: u32) -> u32 {
        self.first + 3 + self.extra() + 2 * tile
    }

    pub fn image_length(&self, tile: u32) -> u32 {
        self.image(tile) + 1
    }

    pub fn object_count(&self) -> u32 {
        5 + self.extra() + 2 * (self.tiles.max(1) - 1)
    }

    /// First object number of the following page.
    pub fn next(&self) -> u32 {
        self.first + self.object_count()
    }
}

/// One output page.
#[derive(Debug, Clone)]
pub struct Page {
    pub directory: usize,
    pub page_number: u32,
    pub tile_count: u32,
    pub extra: u32,
    pub plan: PagePlan,
    pub layout: PageLayout,
}

/// Result of scanning a container.
#[derive(Debug, Clone)]
pub struct Scan {
    pub pages: Vec<Page>,
    /// Highest object number in the document.
    pub object_count: u32,
    pub pdf_minor: u8,
}

/// Whether a directory holds a page rather than a thumbnail or mask.
pub fn is_page(dir: &Directory) -> bool {
    if dir.page_number.is_some() {
        return true;
    }
    if let Some(kind) = dir.new_subfile_type {
        return kind == 0 || kind & FILETYPE_PAGE != 0;
    }
    if let Some(kind) = dir.subfile_type {
        return matches!(kind, 0 | 1 | 3);
    }
    true
}

/// Enumerates, classifies and numbers the pages of `container`.
pub fn scan<C: Container + ?Sized>(container: &mut C, options: &ConvertOptions) -> Result<Scan> {
    let count = container.directory_count()?;
    let mut pages = Vec::with_capacity(count);

    for index in 0..count {
        let dir = container.directory(index)?;
        if !is_page(&dir) {
            log::debug!("directory {}: not a page, skipping", index);
            continue;
        }
        let page_number = match dir.page_number {
            Some((number, total)) if total != 0 && total < number => u32::from(total),
            Some((number, _)) => u32::from(number),
            None => pages.len() as u32,
        };
        let plan = classify(&dir, index, options)?;
        pages.push(Page {
            directory: index,
            page_number,
            tile_count: plan.tile_count(),
            extra: plan.extra(),
            layout: PageLayout::new(0, &plan),
            plan,
        });
    }

    // Stable, so equal page numbers keep directory order.
    pages.sort_by_key(|page| page.page_number);

    let mut next = PAGES_OBJECT + 1;
    let mut pdf_minor = 1;
    for page in &mut pages {
        page.layout.first = next;
        next = page.layout.next();
        pdf_minor = pdf_minor.max(page.plan.pdf_minor());
        log::debug!(
            "page {} (directory {}): objects {}..{}",
            page.page_number,
            page.directory,
            page.layout.first,
            next - 1
        );
    }

    Ok(Scan {
        pages,
        object_count: next - 1,
        pdf_minor,
    })
}
