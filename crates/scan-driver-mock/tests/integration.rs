//! Integration tests for the mock collaborators

use scan_core::{ControlPoint, MotionError, Position, Scannable, TrajectoryController};
use scan_driver_mock::*;
use std::time::Duration;

/// Test that all mocks can be instantiated
#[test]
fn test_all_mocks_instantiate() {
    let axis = MockAxis::builder("x").build();
    let defer = MockControlPoint::new("defer");
    let controller = MockTrajectoryController::new("traj", 3);

    assert_eq!(controller.number_axes(), 3);
    drop((axis, defer, controller));
}

/// Clones share state, so a handle kept by a test sees moves made through another
#[tokio::test]
async fn test_axis_clones_share_state() {
    let axis = MockAxis::new("x");
    let handle = axis.clone();

    axis.move_to(Position::scalar(3.0)).await.unwrap();

    assert_eq!(handle.position().await.unwrap(), Position::scalar(3.0));
    assert_eq!(handle.moves(), vec![Position::scalar(3.0)]);
}

#[tokio::test]
async fn test_axis_as_trait_object() {
    let axis: std::sync::Arc<dyn Scannable> = std::sync::Arc::new(
        MockAxis::builder("table")
            .input_names(["tx", "ty"])
            .mode(MockMode::Realistic)
            .speed(200.0)
            .build(),
    );

    axis.move_and_wait(Position::from(vec![1.0, 2.0]))
        .await
        .unwrap();
    assert_eq!(
        axis.position().await.unwrap(),
        Position::from(vec![1.0, 2.0])
    );
    assert_eq!(axis.to_formatted_string().await, "table : [1, 2]");
}

/// Test communication loss surfaces as a device error and sticks
#[tokio::test]
async fn test_communication_loss() {
    let axis = MockAxis::builder("x")
        .error_config(ErrorConfig::scenario(ErrorScenario::CommunicationLoss))
        .build();

    let err = axis.position().await.unwrap_err();
    assert!(matches!(err, MotionError::Device(_)));
    assert_eq!(axis.to_formatted_string().await, "x : UNAVAILABLE");
}

/// Test random error config with seed
#[tokio::test]
async fn test_seeded_failures_are_reproducible() {
    let run = |seed| async move {
        let defer = MockControlPoint::with_errors(
            "defer",
            ErrorConfig::random_failures_seeded(0.5, Some(seed)),
        );
        let mut outcomes = Vec::new();
        for i in 0..20 {
            outcomes.push(defer.set_value(i).await.is_ok());
        }
        outcomes
    };

    assert_eq!(run(12345).await, run(12345).await);
}

#[tokio::test]
async fn test_trajectory_timed_execution() {
    let controller = MockTrajectoryController::new("traj", 2)
        .with_mode(MockMode::Realistic, Duration::from_millis(10));

    controller.add_point(vec![Some(1.0), Some(2.0)]).await.unwrap();
    controller.add_point(vec![Some(3.0), None]).await.unwrap();
    assert!(controller.is_moving().await.unwrap());

    controller.wait_while_moving().await.unwrap();
    assert_eq!(controller.points().len(), 2);
}

/// A timed-out stop surfaces as a device error and spares other operations
#[tokio::test]
async fn test_stop_timeout_surfaces_as_device_error() {
    let axis = MockAxis::builder("x")
        .error_config(ErrorConfig::scenario(ErrorScenario::Timeout { operation: "stop" }))
        .build();

    let err = axis.stop().await.unwrap_err();
    assert!(matches!(err, MotionError::Device(_)));
    assert!(err.to_string().contains("timed out"));
    assert!(axis.move_to(Position::scalar(1.0)).await.is_ok());
}
