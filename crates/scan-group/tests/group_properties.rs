//! Behavioural tests for every group flavour, driven through mock hardware

use async_trait::async_trait;
use scan_core::{MotionError, Position, Scannable, TrajectoryController};
use scan_driver_mock::{
    ErrorConfig, ErrorScenario, MockAxis, MockControlPoint, MockMode, MockTrajectoryController,
};
use scan_group::{
    CoordinatedParent, CoordinatedScannableGroup, CoupledAxisScannableGroup,
    DeferredAndTrajectoryScannableGroup, DeferredScannableGroup, GroupSettings, ScannableGroup,
    ThresholdInterlock,
};
use std::sync::Arc;
use tokio::sync::Notify;

fn as_members(axes: &[&MockAxis]) -> Vec<Arc<dyn Scannable>> {
    axes.iter()
        .map(|a| Arc::new((*a).clone()) as Arc<dyn Scannable>)
        .collect()
}

fn table() -> MockAxis {
    MockAxis::builder("table")
        .input_names(["tx", "ty"])
        .extra_names(["temp"])
        .initial_position(vec![2.0, 3.0])
        .extra_values(vec![21.5])
        .build()
}

/// Reading the group and moving to the input part of that readback sends
/// every member exactly what it reported.
#[tokio::test]
async fn test_readback_move_round_trip() {
    let x = MockAxis::builder("x").initial_position(vec![1.0]).build();
    let table = table();
    let z = MockAxis::builder("z").initial_position(vec![4.0]).build();
    let group = ScannableGroup::new("g", as_members(&[&x, &table, &z]));

    let readback = group.position().await.unwrap();
    assert_eq!(readback, Position::from(vec![1.0, 2.0, 3.0, 4.0, 21.5]));

    let mut fields = readback.fields();
    fields.truncate(group.input_names().len());
    group.move_to(Position::Array(fields)).await.unwrap();

    assert_eq!(x.last_move(), Some(Position::scalar(1.0)));
    assert_eq!(table.last_move(), Some(Position::from(vec![2.0, 3.0])));
    assert_eq!(z.last_move(), Some(Position::scalar(4.0)));
}

#[tokio::test]
async fn test_wrong_field_count_touches_nothing() {
    let (x, table) = (MockAxis::new("x"), table());
    let plain = ScannableGroup::new("g", as_members(&[&x, &table]));
    let coordinated = CoordinatedScannableGroup::new("cg", as_members(&[&x, &table]));

    for position in [
        Position::from(vec![1.0, 2.0]),
        Position::from(vec![1.0, 2.0, 3.0, 4.0]),
        Position::scalar(1.0),
    ] {
        let err = plain.move_to(position.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            MotionError::InvalidFieldCount { expected: 3, .. }
        ));
        assert!(coordinated.move_to(position).await.is_err());
    }

    let err = plain
        .move_to(Position::from(vec![1.0, 2.0]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Expected = 3 actual = 2 position= [1, 2]"));
    assert_eq!(x.move_count() + table.move_count(), 0);
}

#[tokio::test]
async fn test_targeting_fires_once_all_members_report() {
    let (a, b, c) = (MockAxis::new("a"), MockAxis::new("b"), MockAxis::new("c"));
    let group = CoordinatedScannableGroup::new("cg", as_members(&[&a, &b, &c]));
    let members = group.core().members();

    for member in &members {
        member.at_level_move_start().await.unwrap();
    }
    members[2].move_to(Position::scalar(30.0)).await.unwrap();
    members[0].move_to(Position::scalar(10.0)).await.unwrap();
    assert!(group.is_targeting());
    assert_eq!(group.core().coordination().pending_targets(), 1);

    members[1].move_to(Position::scalar(20.0)).await.unwrap();
    assert!(!group.is_targeting());
    for (axis, expected) in [(&a, 10.0), (&b, 20.0), (&c, 30.0)] {
        assert_eq!(axis.moves(), vec![Position::scalar(expected)]);
    }

    // A second target for the same point is refused
    assert!(matches!(
        group.core().coordination().set_child_target(
            group.core().children()[0].id(),
            Position::scalar(1.0)
        ),
        Err(MotionError::Targeting(_))
    ));
}

#[tokio::test]
async fn test_defer_cleared_after_failed_move() {
    let defer = MockControlPoint::new("defer");
    let a = MockAxis::new("a");
    let bad = MockAxis::builder("bad")
        .error_config(ErrorConfig::scenario(ErrorScenario::CommunicationLoss))
        .build();
    let group = DeferredScannableGroup::new(
        "dg",
        as_members(&[&a, &bad]),
        Arc::new(defer.clone()),
    );

    assert!(group
        .move_to(Position::from(vec![1.0, 2.0]))
        .await
        .is_err());

    assert_eq!(defer.history().first(), Some(&1));
    assert_eq!(defer.current(), 0);
    assert_eq!(a.stop_count(), 1);
    assert_eq!(bad.stop_count(), 1);
    assert!(!group.is_targeting());
}

#[tokio::test]
async fn test_busy_when_any_member_busy() {
    let (a, b, c) = (MockAxis::new("a"), MockAxis::new("b"), MockAxis::new("c"));
    let plain = ScannableGroup::new("g", as_members(&[&a, &b, &c]));
    let coordinated = CoordinatedScannableGroup::new("cg", as_members(&[&a, &b, &c]));

    assert!(!plain.is_busy().await.unwrap());
    assert!(!coordinated.is_busy().await.unwrap());

    for axis in [&a, &b, &c] {
        axis.hold_busy(true);
        assert!(plain.is_busy().await.unwrap());
        assert!(coordinated.is_busy().await.unwrap());
        axis.hold_busy(false);
    }
    assert!(!plain.is_busy().await.unwrap());
}

#[tokio::test]
async fn test_continuous_readback_without_points() {
    let x = MockAxis::builder("x").initial_position(vec![1.5]).build();
    let y = MockAxis::builder("y").initial_position(vec![-2.0]).build();
    let controller = MockTrajectoryController::new("traj", 2);
    let group = DeferredAndTrajectoryScannableGroup::new(
        "tg",
        as_members(&[&x, &y]),
        Arc::new(MockControlPoint::new("defer")),
        Arc::new(controller.clone()),
    );
    let aggregate = ScannableGroup::new("g", as_members(&[&x, &y]));

    group.set_operating_continuously(true);
    assert_eq!(controller.last_point_added().await.unwrap(), None);
    assert_eq!(
        group.position().await.unwrap(),
        aggregate.position().await.unwrap()
    );
}

#[tokio::test]
async fn test_continuous_moves_stream_and_wait_on_controller() {
    let (x, y) = (MockAxis::new("x"), MockAxis::new("y"));
    let controller = MockTrajectoryController::new("traj", 2)
        .with_mode(MockMode::Realistic, std::time::Duration::from_millis(20));
    let group = DeferredAndTrajectoryScannableGroup::new(
        "tg",
        as_members(&[&x, &y]),
        Arc::new(MockControlPoint::new("defer")),
        Arc::new(controller.clone()),
    );
    group.configure().await.unwrap();
    group.set_operating_continuously(true);

    group
        .move_to(Position::from(vec![1.0, 2.0]))
        .await
        .unwrap();
    group
        .move_to(Position::from(vec![3.0, 4.0]))
        .await
        .unwrap();
    group.wait_while_busy().await.unwrap();

    assert_eq!(controller.points().len(), 2);
    assert!(!group.is_busy().await.unwrap());
    assert_eq!(
        group.position().await.unwrap(),
        Position::from(vec![3.0, 4.0])
    );
    assert_eq!(x.move_count() + y.move_count(), 0);
}

#[tokio::test]
async fn test_coupled_interlock_example() {
    let theta = MockAxis::builder("theta")
        .mode(MockMode::Realistic)
        .speed(20.0)
        .build();
    let (phi, chi, z) = (MockAxis::new("phi"), MockAxis::new("chi"), MockAxis::new("z"));
    let group = CoupledAxisScannableGroup::with_settings(
        "diff",
        as_members(&[&theta, &phi, &chi, &z]),
        ThresholdInterlock::default(),
        GroupSettings {
            poll_interval_ms: 5,
            ..GroupSettings::default()
        },
    );

    let rejected = group
        .move_to(Position::from(vec![2.0, 12.0, 1.0, 1.0]))
        .await;
    assert!(matches!(rejected, Err(MotionError::Interlock { .. })));
    assert_eq!(theta.move_count() + phi.move_count() + chi.move_count() + z.move_count(), 0);

    group
        .move_to(Position::from(vec![2.0, 5.0, 1.0, 1.0]))
        .await
        .unwrap();
    assert_eq!(chi.move_count(), 1);
    assert_eq!(z.move_count(), 1);
    assert!(group.is_busy().await.unwrap());

    group.wait_while_busy().await.unwrap();
    assert_eq!(theta.moves(), vec![Position::scalar(2.0)]);
    assert_eq!(phi.moves(), vec![Position::scalar(5.0)]);
}

/// Holds its move open until released, so a group move can be caught mid-flight.
struct HeldAxis {
    axis: MockAxis,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Scannable for HeldAxis {
    fn name(&self) -> &str {
        self.axis.name()
    }

    fn input_names(&self) -> Vec<String> {
        self.axis.input_names()
    }

    async fn move_to(&self, position: Position) -> scan_core::Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.axis.move_to(position).await
    }

    async fn position(&self) -> scan_core::Result<Position> {
        self.axis.position().await
    }

    async fn is_busy(&self) -> scan_core::Result<bool> {
        self.axis.is_busy().await
    }

    async fn stop(&self) -> scan_core::Result<()> {
        self.axis.stop().await
    }
}

#[tokio::test]
async fn test_group_busy_while_move_in_flight() {
    let held = Arc::new(HeldAxis {
        axis: MockAxis::new("held"),
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    });
    let group = Arc::new(ScannableGroup::new("g", vec![held.clone() as Arc<dyn Scannable>]));

    let first = tokio::spawn({
        let group = group.clone();
        async move { group.move_to(Position::scalar(1.0)).await }
    });
    held.entered.notified().await;

    assert!(matches!(
        group.move_to(Position::scalar(2.0)).await,
        Err(MotionError::GroupBusy { ref group }) if group == "g"
    ));
    assert!(matches!(
        group.add_member(Arc::new(MockAxis::new("z"))),
        Err(MotionError::GroupBusy { .. })
    ));

    held.release.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(held.axis.moves(), vec![Position::scalar(1.0)]);
}
