//! Page, image and tile placement.
//!
//! Boxes are in PDF points with the origin at the bottom left. Every image
//! is drawn through a [`Matrix`] that maps the unit square onto its box and
//! applies the TIFF orientation.

use lopdf::content::{Content, Operation};
use lopdf::Object;

use crate::container::{Directory, RESUNIT_CENTIMETER, RESUNIT_INCH, RESUNIT_NONE};
use crate::options::ConvertOptions;

const POINTS_PER_INCH: f32 = 72.0;
const CM_PER_INCH: f32 = 2.54;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Same rectangle with x1 <= x2 and y1 <= y2.
    fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }
}

/// 3x3 placement matrix, row-major, affine part in `m[0..2]`, `m[3..5]`
/// and `m[6..8]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub m: [f32; 9],
}

impl Matrix {
    /// Scale and translate the unit square onto `rect`.
    fn for_rect(rect: &Rect) -> Self {
        Matrix {
            m: [rect.width(), 0.0, 0.0, 0.0, rect.height(), 0.0, rect.x1, rect.y1, 1.0],
        }
    }

    /// Operands of the `cm` operator.
    pub fn cm(&self) -> [f32; 6] {
        let m = &self.m;
        [m[0], m[1], m[3], m[4], m[6], m[7]]
    }
}

/// Placement matrix for `rect` drawn with `orientation` (1 to 8).
pub fn compose_orient(rect: &Rect, orientation: u16) -> Matrix {
    let rect = rect.normalized();
    let (w, h) = (rect.width(), rect.height());
    let mut mat = Matrix::for_rect(&rect);
    let m = &mut mat.m;
    match orientation {
        2 => {
            m[0] = -w;
            m[6] += w;
        }
        3 => {
            m[0] = -w;
            m[4] = -h;
            m[6] += w;
            m[7] += h;
        }
        4 => {
            m[4] = -h;
            m[7] += h;
        }
        5 => {
            m[0] = 0.0;
            m[1] = -w;
            m[3] = -h;
            m[4] = 0.0;
            m[6] += h;
            m[7] += w;
        }
        6 => {
            m[0] = 0.0;
            m[1] = -w;
            m[3] = h;
            m[4] = 0.0;
            m[7] += w;
        }
        7 => {
            m[0] = 0.0;
            m[1] = w;
            m[3] = h;
            m[4] = 0.0;
        }
        8 => {
            m[0] = 0.0;
            m[1] = w;
            m[3] = -h;
            m[4] = 0.0;
            m[6] += h;
        }
        _ => {}
    }
    mat
}

/// Placement matrix for a tile box whose axes were already swapped for a
/// transposing orientation (5 to 8).
pub fn orient_flip(rect: &Rect, orientation: u16) -> Matrix {
    let rect = rect.normalized();
    let (w, h) = (rect.width(), rect.height());
    let mut mat = Matrix::for_rect(&rect);
    let m = &mut mat.m;
    match orientation {
        5 => {
            m[0] = 0.0;
            m[1] = -h;
            m[3] = -w;
            m[4] = 0.0;
            m[6] += w;
            m[7] += h;
        }
        6 => {
            m[0] = 0.0;
            m[1] = -h;
            m[3] = w;
            m[4] = 0.0;
            m[7] += h;
        }
        7 => {
            m[0] = 0.0;
            m[1] = h;
            m[3] = w;
            m[4] = 0.0;
        }
        8 => {
            m[0] = 0.0;
            m[1] = h;
            m[3] = -w;
            m[4] = 0.0;
            m[6] += w;
        }
        _ => {}
    }
    mat
}

/// Tile layout of a tiled page, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub across: u32,
    pub down: u32,
    pub tile_width: u32,
    pub tile_length: u32,
    /// Width of the last column, 0 when the image width is a multiple of
    /// the tile width.
    pub edge_width: u32,
    pub edge_length: u32,
}

impl TileGrid {
    pub fn new(dir: &Directory) -> Option<Self> {
        let (tile_width, tile_length) = dir.tile_size?;
        if tile_width == 0 || tile_length == 0 {
            return None;
        }
        Some(Self {
            across: dir.width.div_ceil(tile_width),
            down: dir.length.div_ceil(tile_length),
            tile_width,
            tile_length,
            edge_width: dir.width % tile_width,
            edge_length: dir.length % tile_length,
        })
    }

    pub fn count(&self) -> u32 {
        self.across * self.down
    }

    pub fn is_right_edge(&self, tile: u32) -> bool {
        self.edge_width != 0 && tile % self.across == self.across - 1
    }

    pub fn is_bottom_edge(&self, tile: u32) -> bool {
        self.edge_length != 0 && tile / self.across == self.down - 1
    }

    pub fn is_edge(&self, tile: u32) -> bool {
        self.is_right_edge(tile) || self.is_bottom_edge(tile)
    }

    /// Pixel size of `tile` with edge tiles cut to the image.
    pub fn tile_size(&self, tile: u32) -> (u32, u32) {
        let width = if self.is_right_edge(tile) {
            self.edge_width
        } else {
            self.tile_width
        };
        let length = if self.is_bottom_edge(tile) {
            self.edge_length
        } else {
            self.tile_length
        };
        (width, length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBox {
    pub rect: Rect,
    pub matrix: Matrix,
}

/// Placement of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageGeometry {
    pub media_box: Rect,
    pub image_box: Rect,
    /// Matrix for an untiled image.
    pub image_matrix: Matrix,
    pub grid: Option<TileGrid>,
    /// One box per tile, empty for untiled pages.
    pub tiles: Vec<TileBox>,
}

/// Effective horizontal and vertical resolution in pixels per inch, and
/// whether the image size is in plain pixel ratios.
fn resolution(dir: &Directory, options: &ConvertOptions) -> (f32, f32, bool) {
    let usable = |r: Option<f32>| r.filter(|v| v.is_finite() && *v > 0.0);
    let scale = match dir.resolution_unit {
        RESUNIT_CENTIMETER => CM_PER_INCH,
        RESUNIT_NONE if options.centimeters => CM_PER_INCH,
        _ => 1.0,
    };
    let mut x = usable(dir.x_resolution).map(|r| r * scale);
    let mut y = usable(dir.y_resolution).map(|r| r * scale);
    let mut from_tags = x.is_some() && y.is_some();

    if let Some((ox, oy)) = options.resolution {
        if options.force_resolution || x.is_none() {
            x = usable(Some(ox));
            from_tags = false;
        }
        if options.force_resolution || y.is_none() {
            y = usable(Some(oy));
            from_tags = false;
        }
    }
    if x.is_none() || y.is_none() {
        from_tags = false;
    }
    let x = x.unwrap_or(options.default_resolution);
    let y = y.unwrap_or(options.default_resolution);
    let unitless = from_tags
        && !options.centimeters
        && dir.resolution_unit != RESUNIT_INCH
        && dir.resolution_unit != RESUNIT_CENTIMETER;
    (x, y, unitless)
}

/// Computes the media box, image box and tile placement of a page.
pub fn compose(dir: &Directory, options: &ConvertOptions) -> PageGeometry {
    let (x_res, y_res, unitless) = resolution(dir, options);
    let (image_width, image_length) = if unitless {
        (dir.width as f32 / x_res, dir.length as f32 / y_res)
    } else {
        (
            dir.width as f32 * POINTS_PER_INCH / x_res,
            dir.length as f32 * POINTS_PER_INCH / y_res,
        )
    };

    let (page_width, page_length) = options
        .page_size
        .map(|size| size.points())
        .unwrap_or((image_width, image_length));

    let mut media_box = Rect::new(0.0, 0.0, page_width, page_length);
    let image_box = if options.page_size.is_some() {
        let x1 = (page_width - image_width) / 2.0;
        let y1 = (page_length - image_length) / 2.0;
        Rect::new(x1, y1, x1 + image_width, y1 + image_length)
    } else {
        Rect::new(0.0, 0.0, image_width, image_length)
    };
    if dir.orientation > 4 {
        std::mem::swap(&mut media_box.x2, &mut media_box.y2);
    }

    let grid = TileGrid::new(dir);
    let tiles = match &grid {
        Some(grid) => tile_boxes(dir, grid, &image_box),
        None => Vec::new(),
    };

    PageGeometry {
        media_box,
        image_box,
        image_matrix: compose_orient(&image_box, dir.orientation),
        grid,
        tiles,
    }
}

fn tile_boxes(dir: &Directory, grid: &TileGrid, image_box: &Rect) -> Vec<TileBox> {
    let (iw, il) = (image_box.width(), image_box.height());
    let (w, l) = (dir.width as f32, dir.length as f32);
    let (tw, tl) = (grid.tile_width as f32, grid.tile_length as f32);

    (0..grid.count())
        .map(|tile| {
            let col = (tile % grid.across) as f32;
            let row = (tile / grid.across) as f32;

            let x1 = image_box.x1 + iw * tw * col / w;
            let x2 = if tile % grid.across == grid.across - 1 {
                image_box.x2
            } else {
                image_box.x1 + iw * tw * (col + 1.0) / w
            };
            let y2 = image_box.y2 - il * tl * row / l;
            let y1 = if tile / grid.across == grid.down - 1 {
                image_box.y1
            } else {
                image_box.y2 - il * tl * (row + 1.0) / l
            };
            let rect = Rect::new(x1, y1, x2, y2);
            TileBox {
                rect,
                matrix: orient_tile(&rect, image_box, dir.orientation),
            }
        })
        .collect()
}

/// Mirrors a tile box inside the image box per orientation and builds its
/// matrix.
fn orient_tile(rect: &Rect, image_box: &Rect, orientation: u16) -> Matrix {
    if orientation <= 1 {
        return compose_orient(rect, 1);
    }
    let (iw, il) = (image_box.width(), image_box.height());
    let mut b = Rect::new(
        rect.x1 - image_box.x1,
        rect.y1 - image_box.y1,
        rect.x2 - image_box.x1,
        rect.y2 - image_box.y1,
    );
    if matches!(orientation, 2 | 3 | 5 | 6) {
        b.x1 = iw - b.x1;
        b.x2 = iw - b.x2;
    }
    if matches!(orientation, 3 | 4 | 5 | 8) {
        b.y1 = il - b.y1;
        b.y2 = il - b.y2;
    }
    if orientation > 4 {
        std::mem::swap(&mut b.x1, &mut b.y1);
        std::mem::swap(&mut b.x2, &mut b.y2);
    }
    let placed = Rect::new(
        b.x1 + image_box.x1,
        b.y1 + image_box.y1,
        b.x2 + image_box.x1,
        b.y2 + image_box.y1,
    );
    if orientation > 4 {
        orient_flip(&placed, orientation)
    } else {
        compose_orient(&placed, orientation)
    }
}

/// Content stream drawing every image of page `page` (1-based).
pub fn content_stream(geometry: &PageGeometry, page: usize, graphics_state: bool) -> Content {
    let mut operations = Vec::new();
    if geometry.tiles.is_empty() {
        draw(&mut operations, &geometry.image_matrix, image_name(page, None), graphics_state);
    } else {
        for (t, tile) in geometry.tiles.iter().enumerate() {
            draw(&mut operations, &tile.matrix, image_name(page, Some(t + 1)), graphics_state);
        }
    }
    Content { operations }
}

fn draw(operations: &mut Vec<Operation>, matrix: &Matrix, name: String, graphics_state: bool) {
    operations.push(Operation::new("q", vec![]));
    if graphics_state {
        operations.push(Operation::new("gs", vec![Object::Name(b"GS1".to_vec())]));
    }
    let cm = matrix.cm().iter().map(|&v| Object::Real(v)).collect();
    operations.push(Operation::new("cm", cm));
    operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
    operations.push(Operation::new("Q", vec![]));
}

/// XObject name `ImP` or `ImP_T`.
pub fn image_name(page: usize, tile: Option<usize>) -> String {
    match tile {
        Some(t) => format!("Im{}_{}", page, t),
        None => format!("Im{}", page),
    }
}
