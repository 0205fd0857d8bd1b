use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const MARGIN: i32 = 60;
pub const PAD_LEFT: i32 = 35;
pub const PAD_TOP: i32 = 35;
pub const PAD_RIGHT: i32 = 35;
pub const PAD_BOTTOM: i32 = 20;
pub const PAIR_COLUMN_GAP: i32 = 100;
pub const PAIR_ROW_GAP: i32 = 80;
pub const SINGLE_ROW_GAP: i32 = PAD_BOTTOM + PAD_TOP + 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    /// Every panel on its own row, right edge at a fixed inset.
    Right,
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alignment::Left => write!(f, "left"),
            Alignment::Right => write!(f, "right"),
        }
    }
}

impl FromStr for Alignment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Alignment::Left),
            "right" => Ok(Alignment::Right),
            other => Err(format!("unsupported alignment: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSize {
    pub width: u32,
    pub height: u32,
}

impl BlockSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Text-draw origin: the top-left of the first glyph, not the panel corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingState {
    /// Cursor at the start of an empty row.
    Idle,
    /// One informational panel placed in the current row, waiting for a second.
    Packing2Up,
    /// Row complete; the next placement drops below it.
    RowDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutCursor {
    pub x: i32,
    pub y: i32,
    /// Panels placed in the current packed row; 2 means the row is full.
    pub column_count: u8,
    pub row_max_height: u32,
}

impl Default for LayoutCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutCursor {
    pub fn new() -> Self {
        Self {
            x: MARGIN,
            y: MARGIN,
            column_count: 0,
            row_max_height: 0,
        }
    }

    pub fn state(&self) -> PackingState {
        match self.column_count {
            0 => PackingState::Idle,
            1 => PackingState::Packing2Up,
            _ => PackingState::RowDone,
        }
    }

    /// Drops below a half-filled or full packed row and returns an Idle
    /// cursor at the margin. An Idle cursor is returned unchanged.
    pub fn finish_row(self) -> Self {
        if self.column_count == 0 {
            return self;
        }
        Self {
            x: MARGIN,
            y: self.y + self.row_max_height as i32 + PAIR_ROW_GAP,
            column_count: 0,
            row_max_height: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEngine {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub alignment: Alignment,
}

impl LayoutEngine {
    pub fn new(canvas_width: u32, canvas_height: u32, alignment: Alignment) -> Self {
        Self {
            canvas_width,
            canvas_height,
            alignment,
        }
    }

    pub fn place_next(
        &self,
        size: BlockSize,
        cursor: LayoutCursor,
        actionable: bool,
    ) -> (Position, LayoutCursor) {
        let (position, next) = match self.alignment {
            Alignment::Right => self.place_right(size, cursor),
            Alignment::Left if actionable => place_full_row(size, cursor),
            Alignment::Left => place_packed(size, cursor),
        };
        debug!(
            x = position.x,
            y = position.y,
            width = size.width,
            height = size.height,
            actionable,
            "placed panel"
        );
        (position, next)
    }

    pub fn fits(&self, position: Position, size: BlockSize) -> bool {
        let (x0, y0, x1, y1) = panel_rect(position, size);
        x0 >= 0 && y0 >= 0 && x1 <= self.canvas_width as i32 && y1 <= self.canvas_height as i32
    }

    fn place_right(&self, size: BlockSize, cursor: LayoutCursor) -> (Position, LayoutCursor) {
        let cursor = cursor.finish_row();
        let x = self.canvas_width as i32 - size.width as i32 - MARGIN - PAD_RIGHT;
        // a panel wider than the canvas still keeps its left edge on screen
        let position = Position {
            x: x.max(MARGIN),
            y: cursor.y,
        };
        let next = LayoutCursor {
            x: MARGIN,
            y: cursor.y + size.height as i32 + SINGLE_ROW_GAP,
            column_count: 0,
            row_max_height: 0,
        };
        (position, next)
    }
}

fn place_full_row(size: BlockSize, cursor: LayoutCursor) -> (Position, LayoutCursor) {
    let cursor = cursor.finish_row();
    let position = Position {
        x: MARGIN,
        y: cursor.y,
    };
    let next = LayoutCursor {
        x: MARGIN,
        y: cursor.y + size.height as i32 + SINGLE_ROW_GAP,
        column_count: 0,
        row_max_height: 0,
    };
    (position, next)
}

fn place_packed(size: BlockSize, cursor: LayoutCursor) -> (Position, LayoutCursor) {
    let cursor = match cursor.state() {
        PackingState::RowDone => cursor.finish_row(),
        PackingState::Idle | PackingState::Packing2Up => cursor,
    };
    let position = Position {
        x: cursor.x,
        y: cursor.y,
    };
    let row_max_height = cursor.row_max_height.max(size.height);
    let next = if cursor.column_count == 1 {
        LayoutCursor {
            x: cursor.x,
            y: cursor.y,
            column_count: 2,
            row_max_height,
        }
    } else {
        LayoutCursor {
            x: cursor.x + size.width as i32 + PAIR_COLUMN_GAP,
            y: cursor.y,
            column_count: 1,
            row_max_height,
        }
    };
    (position, next)
}

/// Background panel corners `(x0, y0, x1, y1)` for a block drawn at `position`.
pub fn panel_rect(position: Position, size: BlockSize) -> (i32, i32, i32, i32) {
    (
        position.x - PAD_LEFT,
        position.y - PAD_TOP,
        position.x + size.width as i32 + PAD_RIGHT,
        position.y + size.height as i32 + PAD_BOTTOM,
    )
}
