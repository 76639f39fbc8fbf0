//! Shelf atlas packer.
//!
//! Blocks are placed left to right on horizontal shelves. A shelf is as tall
//! as the first block placed on it; later blocks go on the first shelf that
//! is tall enough and has room. When no shelf fits, a new shelf opens below
//! the last one, and when a layer is full a new layer opens.

use std::collections::HashMap;

use super::{BlockHandle, TextureLayout};

#[derive(Debug, Clone)]
struct Shelf {
    y: u32,
    height: u32,
    cursor: u32,
    live: u32,
}

#[derive(Debug, Clone, Default)]
struct Layer {
    shelves: Vec<Shelf>,
}

impl Layer {
    fn next_shelf_y(&self) -> u32 {
        self.shelves.last().map(|s| s.y + s.height).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    layout: TextureLayout,
    shelf: usize,
}

/// Packs rectangular blocks into layers of a fixed size.
#[derive(Debug, Clone)]
pub struct AtlasPacker {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
    blocks: HashMap<BlockHandle, Placement>,
    next_handle: u32,
}

impl AtlasPacker {
    /// Create a packer for layers of `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            blocks: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Layer width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Layer height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of layers that have ever held a block.
    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    /// Number of live blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether a block of this size fits in one layer.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width > 0 && height > 0 && width <= self.width && height <= self.height
    }

    /// Place a block, returning its handle and layout.
    ///
    /// Returns `None` if the block cannot fit in a single layer.
    pub fn add_block(&mut self, width: u32, height: u32) -> Option<(BlockHandle, TextureLayout)> {
        if !self.fits(width, height) {
            return None;
        }

        let placement = self
            .place_on_existing_shelf(width, height)
            .or_else(|| self.place_on_new_shelf(width, height))
            .unwrap_or_else(|| self.place_on_new_layer(width, height));

        let handle = BlockHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.blocks.insert(handle, placement);
        Some((handle, placement.layout))
    }

    /// Layout of a live block, or [`TextureLayout::INVALID`].
    pub fn layout(&self, handle: BlockHandle) -> TextureLayout {
        self.blocks
            .get(&handle)
            .map(|p| p.layout)
            .unwrap_or(TextureLayout::INVALID)
    }

    /// Free a block. Shelves left empty at the bottom of a layer are reclaimed.
    pub fn remove_block(&mut self, handle: BlockHandle) -> bool {
        let Some(placement) = self.blocks.remove(&handle) else {
            return false;
        };
        let layer = &mut self.layers[placement.layout.slice as usize];
        if let Some(shelf) = layer.shelves.get_mut(placement.shelf) {
            shelf.live -= 1;
            if shelf.live == 0 {
                shelf.cursor = 0;
            }
        }
        while layer.shelves.last().is_some_and(|s| s.live == 0) {
            layer.shelves.pop();
        }
        true
    }

    fn place_on_existing_shelf(&mut self, width: u32, height: u32) -> Option<Placement> {
        for (slice, layer) in self.layers.iter_mut().enumerate() {
            for (index, shelf) in layer.shelves.iter_mut().enumerate() {
                if shelf.height >= height && self.width - shelf.cursor >= width {
                    let layout = TextureLayout {
                        x: shelf.cursor,
                        y: shelf.y,
                        w: width,
                        h: height,
                        slice: slice as u32,
                    };
                    shelf.cursor += width;
                    shelf.live += 1;
                    return Some(Placement {
                        layout,
                        shelf: index,
                    });
                }
            }
        }
        None
    }

    fn place_on_new_shelf(&mut self, width: u32, height: u32) -> Option<Placement> {
        let atlas_height = self.height;
        let (slice, layer) = self
            .layers
            .iter_mut()
            .enumerate()
            .find(|(_, layer)| atlas_height - layer.next_shelf_y() >= height)?;
        Some(open_shelf(layer, slice as u32, width, height))
    }

    fn place_on_new_layer(&mut self, width: u32, height: u32) -> Placement {
        let slice = self.layers.len() as u32;
        self.layers.push(Layer::default());
        let layer = &mut self.layers[slice as usize];
        open_shelf(layer, slice, width, height)
    }
}

fn open_shelf(layer: &mut Layer, slice: u32, width: u32, height: u32) -> Placement {
    let y = layer.next_shelf_y();
    layer.shelves.push(Shelf {
        y,
        height,
        cursor: width,
        live: 1,
    });
    Placement {
        layout: TextureLayout {
            x: 0,
            y,
            w: width,
            h: height,
            slice,
        },
        shelf: layer.shelves.len() - 1,
    }
}
