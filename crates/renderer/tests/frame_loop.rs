//! Frame orchestrator behaviour against the mock device.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use renderer_renderer::ubo::SceneUniforms;
use renderer_renderer::{FrameOutcome, FrameState, RendererError};
use renderer_rhi::RhiError;
use renderer_rhi::gpu::QueueKind;
use renderer_rhi::mock::{MockDevice, MockEvent};

use common::{TestSurface, orchestrator, presents, submits};

fn presented(outcome: FrameOutcome) -> bool {
    matches!(
        outcome,
        FrameOutcome::Presented {
            recreated: false,
            ..
        }
    )
}

#[test]
fn test_ten_frames_alternate_two_slots() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    mock.clear_events();

    let mut sequence = Vec::new();
    for _ in 0..10 {
        let mut seen = None;
        let outcome = frames
            .draw_frame(&surface, |frame| {
                seen = Some(frame.frame);
                Ok(())
            })
            .unwrap();
        assert!(presented(outcome));
        sequence.push(seen.unwrap());
    }

    assert_eq!(sequence, [0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(frames.current_frame(), 0);
    assert_eq!(frames.state(), FrameState::Idle);

    let events = mock.events();
    assert_eq!(submits(&events), 10);
    assert_eq!(presents(&events), 10);
    assert!(events.iter().all(|event| !matches!(
        event,
        MockEvent::Submit {
            queue: QueueKind::Present,
            ..
        }
    )));
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_in_flight_work_is_bounded() {
    for frames_in_flight in 1..=3 {
        let mock = Arc::new(MockDevice::new());
        let surface = TestSurface::new(800, 600);
        let mut frames = orchestrator(&mock, &surface, frames_in_flight);
        mock.clear_events();

        for _ in 0..12 {
            frames.draw_frame(&surface, |_| Ok(())).unwrap();
        }
        assert!(mock.max_pending_fences() <= frames_in_flight);

        // A fence is only submitted again after the host has waited on it.
        let mut waited: HashMap<u64, bool> = HashMap::new();
        for event in mock.events() {
            match event {
                MockEvent::WaitForFence(fence) => {
                    waited.insert(fence, true);
                }
                MockEvent::Submit { fence, .. } if fence != 0 => {
                    assert!(
                        waited.get(&fence).copied().unwrap_or(true),
                        "fence {fence} resubmitted without a wait"
                    );
                    waited.insert(fence, false);
                }
                _ => {}
            }
        }
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }
}

#[test]
fn test_second_user_of_an_image_waits_for_the_first() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    let first = frames.slots().get(0).unwrap().in_flight().handle();
    let second = frames.slots().get(1).unwrap().in_flight().handle();

    mock.push_acquire_result(Ok((0, false)));
    mock.push_acquire_result(Ok((0, false)));
    frames.draw_frame(&surface, |_| Ok(())).unwrap();
    assert_eq!(frames.image_fences().get(0), Some(first));

    mock.clear_events();
    frames.draw_frame(&surface, |_| Ok(())).unwrap();

    let events = mock.events();
    let acquire = events
        .iter()
        .position(|event| matches!(event, MockEvent::Acquire { .. }))
        .unwrap();
    let submit = events
        .iter()
        .position(|event| matches!(event, MockEvent::Submit { .. }))
        .unwrap();
    assert_eq!(events[0], MockEvent::WaitForFence(second.as_raw()));
    assert!(events[acquire..submit].contains(&MockEvent::WaitForFence(first.as_raw())));
    assert_eq!(frames.image_fences().get(0), Some(second));
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_round_robin_images_never_share_unguarded() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    // Three images, two slots: image 0 is reused by the other slot on frame 3.
    let mut frames = orchestrator(&mock, &surface, 2);
    mock.clear_events();
    for _ in 0..9 {
        frames.draw_frame(&surface, |_| Ok(())).unwrap();
    }

    let mut last_user: HashMap<u32, u64> = HashMap::new();
    let mut image = None;
    let mut waits = Vec::new();
    let mut guarded = 0;
    for event in mock.events() {
        match event {
            MockEvent::Acquire { result: Ok(index), .. } => {
                image = Some(index);
                waits.clear();
            }
            MockEvent::WaitForFence(fence) => waits.push(fence),
            MockEvent::Submit { fence, .. } => {
                let index = image.unwrap();
                if let Some(&previous) = last_user.get(&index)
                    && previous != fence
                {
                    assert!(waits.contains(&previous));
                    guarded += 1;
                }
                last_user.insert(index, fence);
            }
            _ => {}
        }
    }
    assert!(guarded > 0);
}

#[test]
fn test_update_hook_writes_the_acquired_images_uniforms() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    let uniforms = SceneUniforms::spinning(
        1.0,
        vk::Extent2D {
            width: 800,
            height: 600,
        },
    );

    mock.push_acquire_result(Ok((2, false)));
    let outcome = frames
        .draw_frame(&surface, |frame| {
            assert_eq!(frame.image_index, 2);
            assert_eq!(frame.extent.width, 800);
            Ok(frame.uniforms.write(&uniforms)?)
        })
        .unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            image_index: 2,
            recreated: false
        }
    );

    let memory = frames
        .lifecycle()
        .resources()
        .and_then(|set| set.uniform_buffer(2))
        .map(|buffer| buffer.buffer().memory().handle())
        .unwrap();
    let contents = mock.memory_contents(memory).unwrap();
    assert_eq!(
        &contents[..SceneUniforms::SIZE],
        bytemuck::bytes_of(&uniforms)
    );
}

#[test]
fn test_hook_error_aborts_before_submit() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    mock.clear_events();

    let result = frames.draw_frame(&surface, |_| {
        Err(RhiError::OutOfBounds("uniform write".to_string()).into())
    });
    assert!(matches!(
        result,
        Err(RendererError::Rhi(RhiError::OutOfBounds(_)))
    ));
    assert_eq!(submits(&mock.events()), 0);
    assert_eq!(frames.state(), FrameState::Idle);
}

#[test]
fn test_fatal_errors_leave_the_orchestrator_idle() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);

    mock.push_acquire_result(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
    assert!(frames.draw_frame(&surface, |_| Ok(())).is_err());
    assert_eq!(frames.state(), FrameState::Idle);

    mock.push_present_result(Err(vk::Result::ERROR_DEVICE_LOST));
    assert!(frames.draw_frame(&surface, |_| Ok(())).is_err());
    assert_eq!(frames.state(), FrameState::Idle);

    mock.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
    assert!(frames.draw_frame(&surface, |_| Ok(())).is_err());
    assert_eq!(frames.state(), FrameState::Idle);

    frames.shutdown().unwrap();
    assert!(frames.draw_frame(&surface, |_| Ok(())).is_err());
    assert_eq!(frames.state(), FrameState::Draining);
}

#[test]
fn test_fatal_errors_carry_the_operation() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);

    let mut frames = orchestrator(&mock, &surface, 2);
    mock.push_acquire_result(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
    let err = frames.draw_frame(&surface, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        RendererError::Rhi(RhiError::Vulkan {
            operation: "vkAcquireNextImageKHR",
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
        })
    ));
    drop(frames);

    let mut frames = orchestrator(&mock, &surface, 2);
    mock.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
    let err = frames.draw_frame(&surface, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        RendererError::Rhi(RhiError::Vulkan {
            operation: "vkQueueSubmit",
            result: vk::Result::ERROR_DEVICE_LOST,
        })
    ));
    drop(frames);

    let mut frames = orchestrator(&mock, &surface, 2);
    mock.push_present_result(Err(vk::Result::ERROR_DEVICE_LOST));
    let err = frames.draw_frame(&surface, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        RendererError::Rhi(RhiError::Vulkan {
            operation: "vkQueuePresentKHR",
            result: vk::Result::ERROR_DEVICE_LOST,
        })
    ));
    assert_eq!(frames.current_frame(), 0);
}

#[test]
fn test_shutdown_drains() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    frames.draw_frame(&surface, |_| Ok(())).unwrap();

    mock.clear_events();
    frames.shutdown().unwrap();
    assert_eq!(mock.events(), [MockEvent::DeviceWaitIdle]);
    assert_eq!(frames.state(), FrameState::Draining);

    assert!(matches!(
        frames.draw_frame(&surface, |_| Ok(())),
        Err(RendererError::Draining)
    ));
    frames.shutdown().unwrap();
    assert_eq!(mock.events().len(), 1);
}

#[test]
fn test_drop_releases_every_object() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let mut frames = orchestrator(&mock, &surface, 2);
    for _ in 0..4 {
        frames.draw_frame(&surface, |_| Ok(())).unwrap();
    }
    drop(frames);

    assert_eq!(mock.live_total(), 0);
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

#[test]
fn test_zero_frames_in_flight_is_rejected() {
    let mock = Arc::new(MockDevice::new());
    let surface = TestSurface::new(800, 600);
    let lifecycle = common::lifecycle(&mock, &surface);
    let result = renderer_renderer::FrameOrchestrator::new(mock.clone(), lifecycle, 0);
    assert!(matches!(result, Err(RendererError::ZeroFramesInFlight)));
}
