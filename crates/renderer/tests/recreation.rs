//! Swapchain recreation and pause behaviour against the mock device.

mod common;

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use renderer_renderer::frame_slots::ImageFenceTable;
use renderer_renderer::{FrameOutcome, RecreateOutcome};
use renderer_rhi::mock::{MockDevice, MockEvent, ObjectKind};

use common::{TestSurface, destroyed_kinds, lifecycle, orchestrator, presents, submits};

#[test]
fn test_resize_rebuilds_in_reverse_order() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut lifecycle = lifecycle(&mock, &surface);
    assert_eq!(lifecycle.image_count(), 3);

    let mut table = ImageFenceTable::new(lifecycle.image_count());
    table.set(1, vk::Fence::from_raw(999));

    surface.set_size(1024, 768);
    mock.set_surface_extent(1024, 768);
    mock.clear_events();

    let outcome = lifecycle.recreate(&surface, &mut table).unwrap();
    assert_eq!(outcome, RecreateOutcome::Rebuilt);

    let events = mock.events();
    assert_eq!(events[0], MockEvent::DeviceWaitIdle);

    let first_create = events
        .iter()
        .position(|event| matches!(event, MockEvent::Create { .. }))
        .unwrap();
    use ObjectKind::*;
    assert_eq!(
        destroyed_kinds(&events[..first_create]),
        [
            CommandBuffer,
            CommandBuffer,
            CommandBuffer,
            DescriptorPool,
            Buffer,
            Memory,
            Buffer,
            Memory,
            Buffer,
            Memory,
            Framebuffer,
            Framebuffer,
            Framebuffer,
            ImageView,
            Image,
            Memory,
            Pipeline,
            PipelineLayout,
            RenderPass,
            ImageView,
            ImageView,
            ImageView,
            Swapchain,
        ]
    );
    // Nothing is destroyed while the new set is built.
    assert!(destroyed_kinds(&events[first_create..]).is_empty());

    let resources = lifecycle.resources().unwrap();
    assert_eq!(
        resources.extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );
    assert_eq!(resources.framebuffer_count(), resources.image_count());
    assert_eq!(table.len(), resources.image_count());
    assert!(table.is_clear());
    assert_eq!(
        resources.depth().map(|depth| depth.extent()),
        Some(resources.extent())
    );
    assert!(events.iter().any(|event| matches!(
        event,
        MockEvent::CreateSwapchain {
            extent: vk::Extent2D {
                width: 1024,
                height: 768
            },
            ..
        }
    )));
    assert_eq!(lifecycle.recreations(), 1);
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_image_count_change_resizes_fence_table() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut lifecycle = lifecycle(&mock, &surface);
    let mut table = ImageFenceTable::new(lifecycle.image_count());

    let mut support = lifecycle
        .device()
        .surface_support()
        .unwrap();
    support.capabilities.min_image_count = 3;
    support.capabilities.max_image_count = 0;
    mock.set_surface_support(support);

    lifecycle.recreate(&surface, &mut table).unwrap();
    assert_eq!(lifecycle.image_count(), 4);
    assert_eq!(table.len(), 4);
    assert!(table.is_clear());
}

#[test]
fn test_recreate_while_paused_touches_nothing() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut lifecycle = lifecycle(&mock, &surface);
    let mut table = ImageFenceTable::new(lifecycle.image_count());
    let live = mock.live_total();

    surface.set_size(0, 0);
    mock.clear_events();
    for _ in 0..5 {
        assert_eq!(
            lifecycle.recreate(&surface, &mut table).unwrap(),
            RecreateOutcome::Paused
        );
    }

    surface.set_size(800, 600);
    surface.set_minimized(true);
    assert_eq!(
        lifecycle.recreate(&surface, &mut table).unwrap(),
        RecreateOutcome::Paused
    );

    assert!(mock.events().is_empty());
    assert_eq!(mock.live_total(), live);
    assert!(lifecycle.is_built());
    assert_eq!(lifecycle.recreations(), 0);
}

#[test]
fn test_zero_sized_window_pauses_the_loop() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    frames.draw_frame(&surface, |_| Ok(())).unwrap();

    surface.set_size(0, 0);
    frames.notify_resized();
    mock.clear_events();
    for _ in 0..3 {
        let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
        assert_eq!(outcome, FrameOutcome::Paused);
    }
    assert!(mock.events().is_empty());
    assert_eq!(frames.current_frame(), 1);

    // The resize is still pending when the window comes back.
    surface.set_size(1024, 768);
    mock.set_surface_extent(1024, 768);
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(frames.lifecycle().recreations(), 1);
    assert_eq!(
        frames.lifecycle().extent(),
        Some(vk::Extent2D {
            width: 1024,
            height: 768
        })
    );
    assert!(!frames.needs_recreate());
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_out_of_date_acquire_recreates_without_submitting() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    frames.draw_frame(&surface, |_| Ok(())).unwrap();
    let old_fence = frames.slots().get(0).unwrap().in_flight().handle();

    mock.clear_events();
    mock.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(frames.current_frame(), 1);
    let events = mock.events();
    assert_eq!(submits(&events), 0);
    assert_eq!(presents(&events), 0);
    assert!(events.contains(&MockEvent::DeviceWaitIdle));
    assert_eq!(frames.image_fences().len(), 3);
    assert!(frames.image_fences().is_clear());
    assert_ne!(frames.slots().get(0).unwrap().in_flight().handle(), old_fence);

    // The next frame runs normally on the rebuilt slots.
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_stale_present_recreates_after_advancing() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);

    mock.push_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: true,
            ..
        }
    ));
    assert_eq!(frames.current_frame(), 1);

    mock.push_present_result(Ok(true));
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: true,
            ..
        }
    ));
    assert_eq!(frames.current_frame(), 0);
    assert_eq!(frames.lifecycle().recreations(), 2);

    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: false,
            ..
        }
    ));
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_suboptimal_acquire_still_draws() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);

    mock.push_acquire_result(Ok((1, true)));
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 1,
            recreated: false
        }
    );
}

#[test]
fn test_minimized_at_startup_builds_on_first_visible_frame() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    surface.set_minimized(true);
    let mut frames = orchestrator(&mock, &surface, 2);

    assert!(!frames.lifecycle().is_built());
    assert!(frames.image_fences().is_empty());
    assert_eq!(mock.live_count(ObjectKind::Swapchain), 0);
    assert_eq!(
        frames.draw_frame(&surface, |_| Ok(())).unwrap(),
        FrameOutcome::Paused
    );

    surface.set_minimized(false);
    let outcome = frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    assert_eq!(frames.image_fences().len(), 3);
    assert_eq!(mock.live_count(ObjectKind::Swapchain), 1);
}
