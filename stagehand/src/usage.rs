//! Fixed mapping from declared usage flags to the access scope and image layout a resource is
//! handed over in once its copy has finished.
//!
//! Usage bits without an entry here are reported as [`StagehandError::UnmappedUsage`]. Callers
//! fall back to the most permissive read scope, and for images to [`vk::ImageLayout::GENERAL`],
//! and are expected to surface the report so the usage can be corrected.
use ash::vk;

use crate::device::AccessScope;
use crate::StagehandError;

const SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::PRE_RASTERIZATION_SHADERS.as_raw()
        | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
);

const STORAGE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
);

/// Scope used when usage cannot be mapped
pub const FALLBACK_SCOPE: AccessScope = AccessScope::new(
    vk::PipelineStageFlags2::ALL_COMMANDS,
    vk::AccessFlags2::MEMORY_READ,
);

pub const FALLBACK_LAYOUT: vk::ImageLayout = vk::ImageLayout::GENERAL;

const BUFFER_ACCESS: [(vk::BufferUsageFlags, AccessScope); 9] = [
    (
        vk::BufferUsageFlags::VERTEX_BUFFER,
        AccessScope::new(
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        ),
    ),
    (
        vk::BufferUsageFlags::INDEX_BUFFER,
        AccessScope::new(
            vk::PipelineStageFlags2::INDEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
        ),
    ),
    (
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        AccessScope::new(SHADER_STAGES, vk::AccessFlags2::UNIFORM_READ),
    ),
    (
        vk::BufferUsageFlags::STORAGE_BUFFER,
        AccessScope::new(SHADER_STAGES, STORAGE_ACCESS),
    ),
    (
        vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
        AccessScope::new(SHADER_STAGES, vk::AccessFlags2::SHADER_SAMPLED_READ),
    ),
    (
        vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
        AccessScope::new(SHADER_STAGES, STORAGE_ACCESS),
    ),
    (
        vk::BufferUsageFlags::INDIRECT_BUFFER,
        AccessScope::new(
            vk::PipelineStageFlags2::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
        ),
    ),
    (
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        AccessScope::new(SHADER_STAGES, STORAGE_ACCESS),
    ),
    (vk::BufferUsageFlags::TRANSFER_SRC, AccessScope::TRANSFER_READ),
];

/// Ordered by priority, the first matching bit decides the layout
const IMAGE_LAYOUTS: [(vk::ImageUsageFlags, vk::ImageLayout, AccessScope); 6] = [
    (
        vk::ImageUsageFlags::STORAGE,
        vk::ImageLayout::GENERAL,
        AccessScope::new(SHADER_STAGES, STORAGE_ACCESS),
    ),
    (
        vk::ImageUsageFlags::SAMPLED,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AccessScope::new(SHADER_STAGES, vk::AccessFlags2::SHADER_SAMPLED_READ),
    ),
    (
        vk::ImageUsageFlags::COLOR_ATTACHMENT,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        AccessScope::new(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
            ),
        ),
    ),
    (
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        AccessScope::new(
            vk::PipelineStageFlags2::from_raw(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            vk::AccessFlags2::from_raw(
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
            ),
        ),
    ),
    (
        vk::ImageUsageFlags::INPUT_ATTACHMENT,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AccessScope::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::INPUT_ATTACHMENT_READ,
        ),
    ),
    (
        vk::ImageUsageFlags::TRANSFER_SRC,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        AccessScope::TRANSFER_READ,
    ),
];

/// Layout and access an image is left in after its copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageUsageState {
    pub layout: vk::ImageLayout,
    pub scope: AccessScope,
}

impl ImageUsageState {
    pub const FALLBACK: Self = Self {
        layout: FALLBACK_LAYOUT,
        scope: FALLBACK_SCOPE,
    };
}

/// Access scope implied by a buffer's usage
pub fn buffer_access(usage: vk::BufferUsageFlags) -> Result<AccessScope, StagehandError> {
    // destination usage only describes the copy itself
    let consumer_usage = usage & !vk::BufferUsageFlags::TRANSFER_DST;
    let mut remaining = consumer_usage;
    let mut scope: Option<AccessScope> = None;
    for (flag, access) in BUFFER_ACCESS {
        if consumer_usage.contains(flag) {
            remaining &= !flag;
            scope = Some(scope.map_or(access, |scope| scope.union(access)));
        }
    }
    match scope {
        Some(scope) if remaining.is_empty() => Ok(scope),
        Some(_) => Err(StagehandError::UnmappedUsage(format!(
            "buffer usage {remaining:?} has no access mapping"
        ))),
        None => Err(StagehandError::UnmappedUsage(format!(
            "buffer usage {usage:?} is never read after the copy"
        ))),
    }
}

/// Layout and access scope implied by an image's usage
pub fn image_usage(usage: vk::ImageUsageFlags) -> Result<ImageUsageState, StagehandError> {
    let consumer_usage = usage & !vk::ImageUsageFlags::TRANSFER_DST;
    let mut remaining = consumer_usage;
    let mut state: Option<ImageUsageState> = None;
    for (flag, layout, access) in IMAGE_LAYOUTS {
        if consumer_usage.contains(flag) {
            remaining &= !flag;
            state = Some(match state {
                // an earlier entry already picked the layout
                Some(state) => ImageUsageState {
                    layout: state.layout,
                    scope: state.scope.union(access),
                },
                None => ImageUsageState {
                    layout,
                    scope: access,
                },
            });
        }
    }
    match state {
        Some(state) if remaining.is_empty() => Ok(state),
        Some(_) => Err(StagehandError::UnmappedUsage(format!(
            "image usage {remaining:?} has no layout mapping"
        ))),
        None => Err(StagehandError::UnmappedUsage(format!(
            "image usage {usage:?} is never read after the copy"
        ))),
    }
}

/// [`buffer_access`], falling back to [`FALLBACK_SCOPE`] and returning the report alongside
pub fn buffer_access_or_fallback(
    usage: vk::BufferUsageFlags,
) -> (AccessScope, Option<StagehandError>) {
    match buffer_access(usage) {
        Ok(scope) => (scope, None),
        Err(error) => (FALLBACK_SCOPE, Some(error)),
    }
}

/// [`image_usage`], falling back to [`ImageUsageState::FALLBACK`] and returning the report
/// alongside
pub fn image_usage_or_fallback(
    usage: vk::ImageUsageFlags,
) -> (ImageUsageState, Option<StagehandError>) {
    match image_usage(usage) {
        Ok(state) => (state, None),
        Err(error) => (ImageUsageState::FALLBACK, Some(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_buffer() {
        let scope = buffer_access(
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )
        .unwrap();
        assert_eq!(scope.stage, vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT);
        assert_eq!(scope.access, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
    }

    #[test]
    fn test_combined_buffer_usage_unions_scopes() {
        let scope = buffer_access(
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
        )
        .unwrap();
        assert!(scope.stage.contains(vk::PipelineStageFlags2::INDEX_INPUT));
        assert!(scope.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(scope.access.contains(vk::AccessFlags2::INDEX_READ));
        assert!(scope.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
    }

    #[test]
    fn test_unmapped_buffer_usage_falls_back() {
        let usage = vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
        assert!(matches!(
            buffer_access(usage),
            Err(StagehandError::UnmappedUsage(_))
        ));
        let (scope, report) = buffer_access_or_fallback(usage);
        assert_eq!(scope, FALLBACK_SCOPE);
        assert!(report.is_some());

        // a copy destination nobody reads is flagged too
        assert!(buffer_access(vk::BufferUsageFlags::TRANSFER_DST).is_err());
    }

    #[test]
    fn test_sampled_image_is_shader_read_only() {
        let state = image_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .unwrap();
        assert_eq!(state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(state.scope.access, vk::AccessFlags2::SHADER_SAMPLED_READ);
    }

    #[test]
    fn test_storage_takes_priority() {
        let state = image_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE)
            .unwrap();
        assert_eq!(state.layout, vk::ImageLayout::GENERAL);
        assert!(state
            .scope
            .access
            .contains(vk::AccessFlags2::SHADER_SAMPLED_READ));
    }

    #[test]
    fn test_unmapped_image_usage_is_general() {
        let (state, report) = image_usage_or_fallback(
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
        );
        assert_eq!(state, ImageUsageState::FALLBACK);
        assert!(matches!(report, Some(StagehandError::UnmappedUsage(_))));
    }
}
