//! Placed-footprint splitting of buffer/texture copies.
//!
//! A placed footprint must start at a 512-byte aligned buffer offset and use
//! a 256-byte aligned row pitch. An arbitrary linear offset is handled by
//! starting the footprint at the preceding aligned address and shifting the
//! copy inside it by whole texels and rows. When the shifted row no longer
//! fits in the row pitch, the copy is split into two side-by-side regions.
//!
//! Everything here is pure arithmetic over plain values.

use crate::gpu::traits::NativeHandle;
use crate::util::layout::{align_down, is_aligned};

/// Required alignment of a footprint's buffer offset.
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;

/// Required alignment of a footprint's row pitch.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

/// Largest number of regions one subresource copy can split into.
pub const MAX_TEXTURE_COPY_REGIONS: usize = 4;

/// Which way a copy moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyDirection {
    /// Linear buffer into a texture
    BufferToTexture,
    /// Texture into a linear buffer
    TextureToBuffer,
}

/// Texel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Origin3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin3D {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Size in texels (depth doubles as array layer count).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

impl Extent3D {
    pub const fn new(width: u32, height: u32, depth_or_array_layers: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers,
        }
    }
}

/// Texel block of a format: bytes per block and block footprint in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelBlockInfo {
    pub byte_size: u32,
    pub width: u32,
    pub height: u32,
}

impl TexelBlockInfo {
    /// Uncompressed format with `byte_size` bytes per texel.
    pub const fn uncompressed(byte_size: u32) -> Self {
        Self {
            byte_size,
            width: 1,
            height: 1,
        }
    }

    /// Block-compressed format with `byte_size` bytes per `width`x`height` block.
    pub const fn compressed(byte_size: u32, width: u32, height: u32) -> Self {
        Self {
            byte_size,
            width,
            height,
        }
    }
}

/// One hardware copy region.
///
/// The buffer side is a footprint starting at `aligned_offset` of
/// `buffer_size` texels, of which the copy reads the box at `buffer_offset`
/// of `copy_size`. The texture side is the box at `texture_offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CopyInfo {
    pub aligned_offset: u64,
    pub texture_offset: Origin3D,
    pub buffer_offset: Origin3D,
    pub buffer_size: Extent3D,
    pub copy_size: Extent3D,
}

/// Regions covering the copy of one subresource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCopySubresource {
    copies: [CopyInfo; MAX_TEXTURE_COPY_REGIONS],
    count: usize,
}

impl TextureCopySubresource {
    /// The regions, in issue order.
    pub fn copies(&self) -> &[CopyInfo] {
        &self.copies[..self.count]
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if there are no regions.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn add_copy(&mut self, copy: CopyInfo) {
        crate::ra_invariant!(
            self.count < MAX_TEXTURE_COPY_REGIONS,
            RA901,
            "more than {} copy regions",
            MAX_TEXTURE_COPY_REGIONS
        );
        self.copies[self.count] = copy;
        self.count += 1;
    }
}

/// Splits for the even and odd layers of a 2D array copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCopySplits {
    pub subresources: [TextureCopySubresource; 2],
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

/// A logical copy between a linear buffer and a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTextureCopy {
    pub direction: CopyDirection,
    pub buffer: NativeHandle,
    /// Byte offset of the first texel in the buffer
    pub offset: u64,
    pub bytes_per_row: u32,
    /// Rows (in blocks) between images; only read for multi-image copies
    pub rows_per_image: u32,
    pub texture: NativeHandle,
    pub dimension: TextureDimension,
    pub block: TexelBlockInfo,
    pub origin: Origin3D,
    pub copy_size: Extent3D,
}

fn align_down_for_data_placement(offset: u64) -> u64 {
    align_down(offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT)
}

/// Texel offset inside the footprint of a byte offset from its aligned start.
fn compute_texel_offsets(block: &TexelBlockInfo, offset: u32, bytes_per_row: u32) -> Origin3D {
    debug_assert!(bytes_per_row != 0);
    let byte_offset_x = offset % bytes_per_row;
    let byte_offset_y = offset - byte_offset_x;
    Origin3D::new(
        byte_offset_x / block.byte_size * block.width,
        byte_offset_y / bytes_per_row * block.height,
        0,
    )
}

/// Buffer byte address of the first texel a region copies.
fn offset_to_first_copied_texel(
    block: &TexelBlockInfo,
    bytes_per_row: u32,
    aligned_offset: u64,
    buffer_offset: Origin3D,
) -> u64 {
    debug_assert_eq!(buffer_offset.z, 0);
    aligned_offset
        + u64::from(buffer_offset.x / block.width * block.byte_size)
        + u64::from(buffer_offset.y / block.height) * u64::from(bytes_per_row)
}

/// Split a single-subresource copy into at most two aligned regions.
pub fn compute_2d_texture_copy_subresource(
    origin: Origin3D,
    copy_size: Extent3D,
    block: &TexelBlockInfo,
    offset: u64,
    bytes_per_row: u32,
) -> TextureCopySubresource {
    crate::ra_invariant!(
        block.byte_size != 0 && bytes_per_row % block.byte_size == 0,
        RA401,
        "bytes per row {} is not a multiple of the block size {}",
        bytes_per_row,
        block.byte_size
    );
    let mut copy = TextureCopySubresource::default();
    let aligned_offset = align_down_for_data_placement(offset);

    if offset == aligned_offset {
        copy.add_copy(CopyInfo {
            aligned_offset,
            texture_offset: origin,
            buffer_offset: Origin3D::default(),
            buffer_size: copy_size,
            copy_size,
        });
        return copy;
    }

    // The aligned start lands some whole rows and texels before the data.
    let texel_offset = compute_texel_offsets(block, (offset - aligned_offset) as u32, bytes_per_row);
    debug_assert!(texel_offset.y <= block.height);

    let copy_bytes_per_row = copy_size.width / block.width * block.byte_size;
    let byte_offset_in_row = texel_offset.x / block.width * block.byte_size;
    if copy_bytes_per_row + byte_offset_in_row <= bytes_per_row {
        // The shifted rows still fit: widen the footprint.
        copy.add_copy(CopyInfo {
            aligned_offset,
            texture_offset: origin,
            buffer_offset: texel_offset,
            buffer_size: Extent3D::new(
                copy_size.width + texel_offset.x,
                copy_size.height + texel_offset.y,
                copy_size.depth_or_array_layers,
            ),
            copy_size,
        });
        return copy;
    }

    // The rows straddle the pitch: copy the part up to the row end, then the
    // wrapped remainder as a second region starting on the next row.
    let texels_per_row = bytes_per_row / block.byte_size * block.width;
    let first_width = texels_per_row - texel_offset.x;
    crate::ra_invariant!(
        copy_size.width > first_width,
        RA401,
        "copy width {} does not straddle the row pitch at texel {}",
        copy_size.width,
        texel_offset.x
    );
    copy.add_copy(CopyInfo {
        aligned_offset,
        texture_offset: origin,
        buffer_offset: texel_offset,
        buffer_size: Extent3D::new(
            texels_per_row,
            copy_size.height + texel_offset.y,
            copy_size.depth_or_array_layers,
        ),
        copy_size: Extent3D::new(first_width, copy_size.height, copy_size.depth_or_array_layers),
    });

    let second_offset = offset + u64::from(first_width / block.width * block.byte_size);
    let second_aligned = align_down_for_data_placement(second_offset);
    let second_texel_offset =
        compute_texel_offsets(block, (second_offset - second_aligned) as u32, bytes_per_row);
    let second_width = copy_size.width - first_width;
    copy.add_copy(CopyInfo {
        aligned_offset: second_aligned,
        texture_offset: Origin3D::new(origin.x + first_width, origin.y, origin.z),
        buffer_offset: second_texel_offset,
        buffer_size: Extent3D::new(
            second_width + second_texel_offset.x,
            copy_size.height + second_texel_offset.y,
            copy_size.depth_or_array_layers,
        ),
        copy_size: Extent3D::new(second_width, copy_size.height, copy_size.depth_or_array_layers),
    });
    copy
}

/// Splits of a 2D array copy: index 0 for even layers, 1 for odd layers.
///
/// With a 256-aligned row pitch every second layer starts a multiple of 512
/// bytes after the previous one of the same parity, so two splits cover
/// every layer once shifted by whole layer pairs.
pub fn compute_2d_texture_copy_splits(
    origin: Origin3D,
    copy_size: Extent3D,
    block: &TexelBlockInfo,
    offset: u64,
    bytes_per_row: u32,
    rows_per_image: u32,
) -> TextureCopySplits {
    let mut splits = TextureCopySplits::default();
    let bytes_per_layer = u64::from(bytes_per_row) * u64::from(rows_per_image);
    let layer_size = Extent3D::new(copy_size.width, copy_size.height, 1);
    let layer_origin = Origin3D::new(origin.x, origin.y, 0);

    splits.subresources[0] =
        compute_2d_texture_copy_subresource(layer_origin, layer_size, block, offset, bytes_per_row);
    if copy_size.depth_or_array_layers == 1 {
        return splits;
    }

    if bytes_per_layer % TEXTURE_DATA_PLACEMENT_ALIGNMENT == 0 {
        let mut odd = splits.subresources[0];
        for copy in &mut odd.copies[..odd.count] {
            copy.aligned_offset += bytes_per_layer;
        }
        splits.subresources[1] = odd;
    } else {
        splits.subresources[1] = compute_2d_texture_copy_subresource(
            layer_origin,
            layer_size,
            block,
            offset + bytes_per_layer,
            bytes_per_row,
        );
    }
    splits
}

/// Split a 3D copy, extending the 2D split of the first slice to every
/// slice.
///
/// When alignment leaves an empty row at the top of the first slice's
/// footprint, the footprint is taller than `rows_per_image` and cannot be
/// repeated per slice as is; those regions are recomputed by copy-height
/// parity.
pub fn compute_3d_texture_copy_splits(
    origin: Origin3D,
    copy_size: Extent3D,
    block: &TexelBlockInfo,
    offset: u64,
    bytes_per_row: u32,
    rows_per_image: u32,
) -> TextureCopySubresource {
    let mut copy = compute_2d_texture_copy_subresource(origin, copy_size, block, offset, bytes_per_row);
    debug_assert!(copy.count <= 2);
    if copy_size.depth_or_array_layers == 1 {
        return copy;
    }

    let rows_per_image_in_texels = rows_per_image * block.height;
    let original_count = copy.count;
    for i in 0..original_count {
        let height = copy.copies[i].buffer_size.height;
        crate::ra_invariant!(
            height <= rows_per_image_in_texels + block.height,
            RA401,
            "footprint height {} exceeds rows per image {} by more than one row",
            height,
            rows_per_image_in_texels
        );

        if height == rows_per_image_in_texels {
            continue;
        }
        if height < rows_per_image_in_texels {
            // Every slice still has to skip a whole image.
            copy.copies[i].buffer_size.height = rows_per_image_in_texels;
            continue;
        }

        // One empty row at the top. That only happens for a full-height copy
        // with the minimal row pitch.
        crate::ra_invariant!(
            bytes_per_row == TEXTURE_DATA_PITCH_ALIGNMENT && copy_size.height == rows_per_image_in_texels,
            RA401,
            "empty first row with bytes per row {} and copy height {} (rows per image {})",
            bytes_per_row,
            copy_size.height,
            rows_per_image_in_texels
        );
        if copy_size.height % 2 == 0 {
            recompute_empty_first_row_even_height(
                origin,
                copy_size,
                block,
                bytes_per_row,
                rows_per_image,
                &mut copy,
                i,
            );
        } else {
            recompute_empty_first_row_odd_height(copy_size, bytes_per_row, &mut copy, i);
        }
    }
    copy
}

/// Even height: no slice ever starts aligned. Copy all rows but the last
/// for every slice, the last row for all slices but the last, and the last
/// row of the last slice on its own so the footprint stays in bounds.
fn recompute_empty_first_row_even_height(
    origin: Origin3D,
    copy_size: Extent3D,
    block: &TexelBlockInfo,
    bytes_per_row: u32,
    rows_per_image: u32,
    copy: &mut TextureCopySubresource,
    i: usize,
) {
    let copy0 = {
        let copy0 = &mut copy.copies[i];
        copy0.copy_size.height = copy_size.height - block.height;
        copy0.buffer_size.height = rows_per_image * block.height;
        *copy0
    };

    let mut copy1 = copy0;
    copy1.aligned_offset += 2 * u64::from(bytes_per_row);
    copy1.texture_offset.y += copy_size.height - block.height;
    // One row for the advance above, one for the last row itself.
    copy1.buffer_offset.y = copy_size.height - 2 * block.height;
    copy1.copy_size.height = block.height;
    copy1.copy_size.depth_or_array_layers -= 1;
    copy1.buffer_size.depth_or_array_layers -= 1;
    copy.add_copy(copy1);

    let first_texel = offset_to_first_copied_texel(block, bytes_per_row, copy0.aligned_offset, copy0.buffer_offset);
    let last_row = first_texel
        + u64::from(bytes_per_row)
            * (u64::from(copy0.copy_size.height)
                + u64::from(rows_per_image) * u64::from(copy_size.depth_or_array_layers - 1));
    let last_row_aligned = align_down_for_data_placement(last_row);
    let last_row_texel_offset = compute_texel_offsets(block, (last_row - last_row_aligned) as u32, bytes_per_row);

    let mut copy2 = CopyInfo {
        aligned_offset: last_row_aligned,
        texture_offset: copy1.texture_offset,
        buffer_offset: last_row_texel_offset,
        buffer_size: Extent3D::default(),
        copy_size: copy1.copy_size,
    };
    copy2.texture_offset.z = origin.z + copy_size.depth_or_array_layers - 1;
    copy2.copy_size.depth_or_array_layers = 1;
    crate::ra_invariant!(
        copy2.copy_size.height == block.height,
        RA401,
        "last row copy of height {}",
        copy2.copy_size.height
    );
    copy2.buffer_size = Extent3D::new(
        copy1.buffer_size.width,
        copy2.buffer_offset.y + copy2.copy_size.height,
        1,
    );
    copy.add_copy(copy2);
}

/// Odd height: the second slice starts aligned, so copy the first slice
/// alone and every other slice in one region.
fn recompute_empty_first_row_odd_height(
    copy_size: Extent3D,
    bytes_per_row: u32,
    copy: &mut TextureCopySubresource,
    i: usize,
) {
    let copy0 = {
        let copy0 = &mut copy.copies[i];
        copy0.copy_size.depth_or_array_layers = 1;
        copy0.buffer_size.depth_or_array_layers = 1;
        *copy0
    };

    let mut copy1 = copy0;
    copy1.aligned_offset += u64::from(copy_size.height + 1) * u64::from(bytes_per_row);
    crate::ra_invariant!(
        is_aligned(copy1.aligned_offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT),
        RA401,
        "second slice offset {} is not placement aligned",
        copy1.aligned_offset
    );
    copy1.texture_offset.z += 1;
    copy1.buffer_offset.y = 0;
    copy1.copy_size.height = copy_size.height;
    copy1.copy_size.depth_or_array_layers = copy_size.depth_or_array_layers - 1;
    copy1.buffer_size.height = copy_size.height;
    copy1.buffer_size.depth_or_array_layers = copy_size.depth_or_array_layers - 1;
    copy.add_copy(copy1);
}

fn check_copy_preconditions(copy: &BufferTextureCopy) {
    let block = &copy.block;
    let size = &copy.copy_size;
    crate::ra_invariant!(
        block.byte_size != 0 && block.width != 0 && block.height != 0,
        RA401,
        "empty texel block {:?}",
        block
    );
    crate::ra_invariant!(
        copy.bytes_per_row != 0 && copy.bytes_per_row % TEXTURE_DATA_PITCH_ALIGNMENT == 0,
        RA401,
        "bytes per row {} is not a non-zero multiple of {}",
        copy.bytes_per_row,
        TEXTURE_DATA_PITCH_ALIGNMENT
    );
    crate::ra_invariant!(
        copy.offset % u64::from(block.byte_size) == 0,
        RA401,
        "offset {} is not a multiple of the block size {}",
        copy.offset,
        block.byte_size
    );
    crate::ra_invariant!(
        size.width % block.width == 0 && size.height % block.height == 0,
        RA401,
        "copy size {}x{} is not a multiple of the {}x{} block",
        size.width,
        size.height,
        block.width,
        block.height
    );
    crate::ra_invariant!(
        u64::from(size.width / block.width) * u64::from(block.byte_size) <= u64::from(copy.bytes_per_row),
        RA401,
        "a row of {} texels does not fit in {} bytes",
        size.width,
        copy.bytes_per_row
    );
    if size.depth_or_array_layers > 1 {
        crate::ra_invariant!(
            copy.rows_per_image * block.height >= size.height,
            RA401,
            "rows per image {} is shorter than the copy height {}",
            copy.rows_per_image,
            size.height
        );
    }
}

/// Compute every hardware region for a logical copy.
///
/// 2D array copies produce one set of regions per layer; 3D copies produce
/// regions spanning all slices. Empty copies produce no regions.
pub fn compute_copy_regions(copy: &BufferTextureCopy) -> Vec<CopyInfo> {
    let size = copy.copy_size;
    if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
        return Vec::new();
    }
    check_copy_preconditions(copy);

    match copy.dimension {
        TextureDimension::D1 if size.depth_or_array_layers > 1 => {
            crate::ra_violation!(RA402, "copy depth {}", size.depth_or_array_layers)
        }
        TextureDimension::D3 => compute_3d_texture_copy_splits(
            copy.origin,
            size,
            &copy.block,
            copy.offset,
            copy.bytes_per_row,
            copy.rows_per_image,
        )
        .copies()
        .to_vec(),
        TextureDimension::D1 | TextureDimension::D2 => {
            let splits = compute_2d_texture_copy_splits(
                copy.origin,
                size,
                &copy.block,
                copy.offset,
                copy.bytes_per_row,
                copy.rows_per_image,
            );
            let bytes_per_layer = u64::from(copy.bytes_per_row) * u64::from(copy.rows_per_image);
            let mut regions = Vec::new();
            for layer in 0..size.depth_or_array_layers {
                let parity = (layer % 2) as usize;
                let shift = bytes_per_layer * u64::from(layer - layer % 2);
                for region in splits.subresources[parity].copies() {
                    let mut region = *region;
                    region.aligned_offset += shift;
                    region.texture_offset.z = copy.origin.z + layer;
                    regions.push(region);
                }
            }
            regions
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RGBA8: TexelBlockInfo = TexelBlockInfo::uncompressed(4);

    fn copy_2d(offset: u64, bytes_per_row: u32, rows_per_image: u32, size: Extent3D) -> BufferTextureCopy {
        BufferTextureCopy {
            direction: CopyDirection::BufferToTexture,
            buffer: NativeHandle(1),
            offset,
            bytes_per_row,
            rows_per_image,
            texture: NativeHandle(2),
            dimension: TextureDimension::D2,
            block: RGBA8,
            origin: Origin3D::default(),
            copy_size: size,
        }
    }

    /// Check that the regions cover every texel exactly once and that each
    /// texel is read from the byte the linear layout puts it at.
    fn assert_covers(copy: &BufferTextureCopy, regions: &[CopyInfo]) {
        let block = copy.block;
        let size = copy.copy_size;
        let bytes_per_row = u64::from(copy.bytes_per_row);
        let mut hits = vec![0u32; (size.width * size.height * size.depth_or_array_layers) as usize];

        for region in regions {
            assert_eq!(region.aligned_offset % TEXTURE_DATA_PLACEMENT_ALIGNMENT, 0);
            assert!(region.buffer_offset.x + region.copy_size.width <= region.buffer_size.width);
            assert!(region.buffer_offset.y + region.copy_size.height <= region.buffer_size.height);
            assert!(u64::from(region.buffer_size.width / block.width * block.byte_size) <= bytes_per_row);
            let rows_per_slice = u64::from(region.buffer_size.height / block.height);

            for dz in 0..region.copy_size.depth_or_array_layers {
                for dy in (0..region.copy_size.height).step_by(block.height as usize) {
                    for dx in (0..region.copy_size.width).step_by(block.width as usize) {
                        let tx = region.texture_offset.x + dx - copy.origin.x;
                        let ty = region.texture_offset.y + dy - copy.origin.y;
                        let tz = region.texture_offset.z + dz - copy.origin.z;
                        hits[((tz * size.height + ty) * size.width + tx) as usize] += 1;

                        let read = region.aligned_offset
                            + u64::from(dz) * rows_per_slice * bytes_per_row
                            + u64::from((region.buffer_offset.y + dy) / block.height) * bytes_per_row
                            + u64::from((region.buffer_offset.x + dx) / block.width * block.byte_size);
                        let expected = copy.offset
                            + u64::from(tz) * u64::from(copy.rows_per_image) * bytes_per_row
                            + u64::from(ty / block.height) * bytes_per_row
                            + u64::from(tx / block.width * block.byte_size);
                        assert_eq!(read, expected, "texel ({}, {}, {}) in {:?}", tx, ty, tz, region);
                    }
                }
            }
        }

        for (index, count) in hits.iter().enumerate() {
            let on_grid = (index as u32 % size.width) % block.width == 0
                && (index as u32 / size.width % size.height) % block.height == 0;
            if on_grid {
                assert_eq!(*count, 1, "texel index {} covered {} times", index, count);
            }
        }
    }

    #[test]
    fn test_aligned_offset_is_single_region() {
        let copy = copy_2d(0, 256, 4, Extent3D::new(64, 4, 1));
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].aligned_offset, 0);
        assert_eq!(regions[0].buffer_offset, Origin3D::default());
        assert_eq!(regions[0].buffer_size, copy.copy_size);
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_full_row_at_unaligned_offset_splits_in_two() {
        let copy = copy_2d(300, 256, 4, Extent3D::new(64, 4, 1));
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 2);

        // 300 = one row of 256 bytes + 11 texels.
        assert_eq!(regions[0].aligned_offset, 0);
        assert_eq!(regions[0].buffer_offset, Origin3D::new(11, 1, 0));
        assert_eq!(regions[0].copy_size.width, 53);
        assert_eq!(regions[1].aligned_offset, 512);
        assert_eq!(regions[1].texture_offset.x, 53);
        assert_eq!(regions[1].copy_size.width, 11);
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_narrow_row_at_unaligned_offset_widens_footprint() {
        let copy = copy_2d(300, 256, 4, Extent3D::new(16, 4, 1));
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].aligned_offset, 0);
        assert_eq!(regions[0].buffer_offset, Origin3D::new(11, 1, 0));
        assert_eq!(regions[0].buffer_size, Extent3D::new(27, 5, 1));
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_3d_empty_first_row_odd_height() {
        let mut copy = copy_2d(256, 256, 3, Extent3D::new(16, 3, 4));
        copy.dimension = TextureDimension::D3;
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].copy_size.depth_or_array_layers, 1);
        assert_eq!(regions[1].texture_offset.z, 1);
        assert_eq!(regions[1].copy_size.depth_or_array_layers, 3);
        assert_eq!(regions[1].aligned_offset, 1024);
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_3d_empty_first_row_even_height() {
        let mut copy = copy_2d(256, 256, 4, Extent3D::new(2, 4, 3));
        copy.dimension = TextureDimension::D3;
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[2].aligned_offset, 3072);
        assert_eq!(regions[2].texture_offset, Origin3D::new(0, 3, 2));
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_3d_short_footprint_is_padded_to_image() {
        let mut copy = copy_2d(0, 256, 8, Extent3D::new(16, 4, 3));
        copy.dimension = TextureDimension::D3;
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].buffer_size.height, 8);
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_2d_array_layers_reuse_parity_splits() {
        for (offset, rows_per_image) in [(0, 4), (300, 4), (300, 5), (768, 3), (260, 7)] {
            let copy = copy_2d(offset, 256, rows_per_image, Extent3D::new(64, 3, 5));
            let regions = compute_copy_regions(&copy);
            assert_covers(&copy, &regions);
        }
    }

    #[test]
    fn test_representative_offsets_round_trip() {
        for offset in [0, 4, 256, 300, 508, 512, 1020] {
            for width in [1, 16, 60, 64] {
                let copy = copy_2d(offset, 256, 4, Extent3D::new(width, 4, 1));
                let regions = compute_copy_regions(&copy);
                assert!(!regions.is_empty() && regions.len() <= 2);
                assert_covers(&copy, &regions);
            }
        }
    }

    #[test]
    fn test_compressed_blocks() {
        let mut copy = copy_2d(544, 512, 8, Extent3D::new(64, 8, 1));
        copy.block = TexelBlockInfo::compressed(16, 4, 4);
        let regions = compute_copy_regions(&copy);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].buffer_offset, Origin3D::new(8, 0, 0));
        assert_covers(&copy, &regions);
    }

    #[test]
    fn test_empty_copy_has_no_regions() {
        let copy = copy_2d(300, 256, 4, Extent3D::new(0, 4, 1));
        assert!(compute_copy_regions(&copy).is_empty());
    }

    #[test]
    #[should_panic(expected = "RA402")]
    fn test_1d_copy_with_depth_panics() {
        let mut copy = copy_2d(0, 256, 1, Extent3D::new(8, 1, 2));
        copy.dimension = TextureDimension::D1;
        compute_copy_regions(&copy);
    }

    #[test]
    #[should_panic(expected = "RA401")]
    fn test_unaligned_pitch_panics() {
        let copy = copy_2d(0, 100, 4, Extent3D::new(8, 4, 1));
        compute_copy_regions(&copy);
    }
}
