//! Canvas layout constants and table size estimation.
//!
//! ```text
//!  ┌──────────────────────────────────────────────┐  ─┬─ TABLE_BORDER
//!  │  icons                                       │   │
//!  │  name        comment                         │   │ TABLE_HEADER_HEIGHT
//!  ├──────────────────────────────────────────────┤  ─┴─
//!  │ [key] name  type  NN  AI  UQ  default  comment │   COLUMN_HEIGHT each
//!  └──────────────────────────────────────────────┘
//!    ◄─ TABLE_PADDING                 TABLE_PADDING ─►
//! ```
//!
//! Text width is estimated from character count. Real glyph metrics belong
//! to the renderer; the estimate only needs to be deterministic so that
//! every peer derives the same size.

use crate::schema::{SchemaState, Show, Table};

pub const START_X: f64 = 200.0;
pub const START_Y: f64 = 100.0;
pub const START_ADD: f64 = 50.0;

pub const INPUT_HEIGHT: f64 = 20.0;
pub const INPUT_MARGIN_RIGHT: f64 = 2.0;

pub const HEADER_ICON_HEIGHT: f64 = 12.0;
pub const HEADER_ICON_MARGIN_BOTTOM: f64 = 4.0;

pub const TABLE_BORDER: f64 = 1.0;
pub const TABLE_PADDING: f64 = 8.0;
pub const TABLE_HEADER_HEIGHT: f64 = HEADER_ICON_HEIGHT + HEADER_ICON_MARGIN_BOTTOM + INPUT_HEIGHT;

pub const COLUMN_HEIGHT: f64 = INPUT_HEIGHT;
pub const COLUMN_DELETE_WIDTH: f64 = 12.0;
pub const COLUMN_KEY_WIDTH: f64 = 12.0;
pub const COLUMN_MIN_WIDTH: f64 = 60.0;
pub const COLUMN_NOT_NULL_WIDTH: f64 = 34.0;
pub const COLUMN_AUTO_INCREMENT_WIDTH: f64 = 15.0;
pub const COLUMN_UNIQUE_WIDTH: f64 = 22.0;

pub const MEMO_MIN_WIDTH: f64 = 116.0;
pub const MEMO_MIN_HEIGHT: f64 = 100.0;

pub const DEFAULT_WIDTH: f64 = 1200.0;

/// Average glyph advance used for width estimation.
pub const CHAR_WIDTH: f64 = 7.0;

/// Tables per row when arranging with `table.sort`.
pub const SORT_COLUMNS: usize = 4;

/// Estimated rendered width of a text field, never below `COLUMN_MIN_WIDTH`.
pub fn text_width(text: &str) -> f64 {
    (text.chars().count() as f64 * CHAR_WIDTH).max(COLUMN_MIN_WIDTH)
}

fn capped(width: f64, max: u32) -> f64 {
    if max == 0 {
        width
    } else {
        width.min(f64::from(max).max(COLUMN_MIN_WIDTH))
    }
}

/// Width and height a table occupies given the current display settings.
pub fn table_size(state: &SchemaState, table: &Table) -> (f64, f64) {
    let show = state.settings.show;
    let max_comment = state.settings.max_width_comment;

    let mut name = COLUMN_MIN_WIDTH;
    let mut data_type = COLUMN_MIN_WIDTH;
    let mut default = COLUMN_MIN_WIDTH;
    let mut comment = COLUMN_MIN_WIDTH;
    let mut rows = 0usize;

    for column in state.table_columns(table) {
        rows += 1;
        name = name.max(text_width(&column.name));
        data_type = data_type.max(text_width(&column.data_type));
        default = default.max(text_width(&column.default));
        comment = comment.max(text_width(&column.comment));
    }

    let mut columns_width = COLUMN_KEY_WIDTH + name + COLUMN_DELETE_WIDTH;
    let mut field = |enabled: bool, width: f64| {
        if enabled {
            columns_width += width + INPUT_MARGIN_RIGHT;
        }
    };
    field(show.contains(Show::COLUMN_DATA_TYPE), data_type);
    field(show.contains(Show::COLUMN_NOT_NULL), COLUMN_NOT_NULL_WIDTH);
    field(
        show.contains(Show::COLUMN_AUTO_INCREMENT),
        COLUMN_AUTO_INCREMENT_WIDTH,
    );
    field(show.contains(Show::COLUMN_UNIQUE), COLUMN_UNIQUE_WIDTH);
    field(show.contains(Show::COLUMN_DEFAULT), default);
    field(
        show.contains(Show::COLUMN_COMMENT),
        capped(comment, max_comment),
    );

    let mut header_width = text_width(&table.name);
    if show.contains(Show::TABLE_COMMENT) {
        header_width += INPUT_MARGIN_RIGHT + capped(text_width(&table.comment), max_comment);
    }

    let width = columns_width.max(header_width) + TABLE_PADDING * 2.0 + TABLE_BORDER * 2.0;
    let height = TABLE_HEADER_HEIGHT
        + rows as f64 * COLUMN_HEIGHT
        + TABLE_PADDING * 2.0
        + TABLE_BORDER * 2.0;
    (width, height)
}

/// Grid position of the `index`-th table when arranging.
pub fn sort_position(index: usize, cell_width: f64, cell_height: f64) -> (f64, f64) {
    let col = index % SORT_COLUMNS;
    let row = index / SORT_COLUMNS;
    (
        START_X + col as f64 * (cell_width + START_ADD),
        START_Y + row as f64 * (cell_height + START_ADD),
    )
}
