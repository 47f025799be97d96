//! Allocator configuration.

use crate::gpu::traits::DescriptorHeapType;
use crate::util::size::{kb, mb};

/// Configuration for residency management and the sub-allocators.
#[derive(Debug, Clone)]
pub struct ResidencyConfig {
    /// Track residency and evict under budget (default: true)
    pub residency_enabled: bool,

    /// Fraction of the OS budget the allocators may use (default: 0.95)
    pub budget_cap: f64,

    /// Largest fraction of the OS budget an external reservation may take (default: 0.5)
    pub external_reservation_cap: f64,

    /// Extra bytes evicted before retrying a failed MakeResident (default: 50 MB)
    pub make_resident_retry_bytes: u64,

    /// Size of each staging ring buffer (default: 4 MB)
    pub upload_chunk_size: u64,

    /// Unsubmitted staging bytes that trigger a flush (default: 64 MB)
    pub upload_flush_threshold: u64,

    /// Initial CBV/SRV/UAV shader-visible heap size in descriptors
    pub view_heap_min_size: u32,

    /// Largest CBV/SRV/UAV shader-visible heap size in descriptors
    pub view_heap_max_size: u32,

    /// Initial sampler shader-visible heap size in descriptors
    pub sampler_heap_min_size: u32,

    /// Largest sampler shader-visible heap size in descriptors
    pub sampler_heap_max_size: u32,

    /// Growth factor applied when a shader-visible heap fills up (default: 2)
    pub shader_visible_growth_factor: u32,

    /// Pin shader-visible heaps at their minimum size
    pub small_shader_visible_heaps: bool,

    /// Descriptors in the first CPU-only heap of each type (default: 64)
    pub cpu_descriptor_heap_initial_size: u32,

    /// Largest CPU-only heap the pool grows to (default: 4096)
    pub cpu_descriptor_heap_max_size: u32,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            residency_enabled: true,
            budget_cap: 0.95,
            external_reservation_cap: 0.5,
            make_resident_retry_bytes: mb(50),
            upload_chunk_size: mb(4),
            upload_flush_threshold: mb(64),
            view_heap_min_size: 1024,
            view_heap_max_size: 1_000_000,
            sampler_heap_min_size: 512,
            sampler_heap_max_size: 2048,
            shader_visible_growth_factor: 2,
            small_shader_visible_heaps: false,
            cpu_descriptor_heap_initial_size: 64,
            cpu_descriptor_heap_max_size: 4096,
        }
    }
}

impl ResidencyConfig {
    /// Create a minimal config for constrained environments.
    pub fn minimal() -> Self {
        Self {
            upload_chunk_size: kb(256),
            upload_flush_threshold: mb(8),
            cpu_descriptor_heap_initial_size: 16,
            cpu_descriptor_heap_max_size: 256,
            ..Self::default()
        }
    }

    /// Create a config for tests: small staging rings and fixed-size
    /// shader-visible heaps, so heap switches happen quickly.
    pub fn for_testing() -> Self {
        Self {
            upload_chunk_size: kb(4),
            upload_flush_threshold: kb(64),
            small_shader_visible_heaps: true,
            ..Self::minimal()
        }
    }

    /// Builder pattern: enable or disable residency management.
    pub fn with_residency(mut self, enable: bool) -> Self {
        self.residency_enabled = enable;
        self
    }

    /// Builder pattern: set the upload chunk size.
    pub fn with_upload_chunk_size(mut self, size: u64) -> Self {
        self.upload_chunk_size = size;
        self
    }

    /// Builder pattern: set the upload flush threshold.
    pub fn with_upload_flush_threshold(mut self, size: u64) -> Self {
        self.upload_flush_threshold = size;
        self
    }

    /// Builder pattern: use fixed minimum-size shader-visible heaps.
    pub fn with_small_shader_visible_heaps(mut self, enable: bool) -> Self {
        self.small_shader_visible_heaps = enable;
        self
    }

    /// Builder pattern: set the shader-visible heap sizes of one heap type.
    pub fn with_shader_visible_heap_sizes(mut self, heap_type: DescriptorHeapType, min: u32, max: u32) -> Self {
        match heap_type {
            DescriptorHeapType::Sampler => {
                self.sampler_heap_min_size = min;
                self.sampler_heap_max_size = max;
            }
            _ => {
                self.view_heap_min_size = min;
                self.view_heap_max_size = max;
            }
        }
        self
    }

    /// Builder pattern: set the MakeResident retry eviction size.
    pub fn with_make_resident_retry_bytes(mut self, bytes: u64) -> Self {
        self.make_resident_retry_bytes = bytes;
        self
    }

    /// Minimum and maximum shader-visible heap size for a heap type.
    pub fn shader_visible_heap_sizes(&self, heap_type: DescriptorHeapType) -> (u32, u32) {
        let (min, max) = match heap_type {
            DescriptorHeapType::Sampler => (self.sampler_heap_min_size, self.sampler_heap_max_size),
            _ => (self.view_heap_min_size, self.view_heap_max_size),
        };
        if self.small_shader_visible_heaps {
            (min, min)
        } else {
            (min, max.max(min))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heap_sizes() {
        let config = ResidencyConfig::default();
        assert_eq!(config.shader_visible_heap_sizes(DescriptorHeapType::CbvSrvUav), (1024, 1_000_000));
        assert_eq!(config.shader_visible_heap_sizes(DescriptorHeapType::Sampler), (512, 2048));
    }

    #[test]
    fn test_small_heaps_pin_max_to_min() {
        let config = ResidencyConfig::default().with_small_shader_visible_heaps(true);
        assert_eq!(config.shader_visible_heap_sizes(DescriptorHeapType::Sampler), (512, 512));
        assert!(ResidencyConfig::for_testing().small_shader_visible_heaps);
    }
}
