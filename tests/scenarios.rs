//! End-to-end frames through layout, model, scheduler and update engine.

use std::sync::Arc;
use std::time::Duration;

use convis::dataset::{synthetic, Dataset};
use convis::model::TinyConvNet;
use convis::surface::{Color, Surface};
use convis::update::FLAT_MAP_FALLBACK;
use convis::{
    FrameScheduler, IntermediatesBundle, LayoutBuilder, RenderConstants, Role, Scene, SchedulerConfig, SlotKey,
    Stage, Tensor, UpdateEngine,
};

fn diagram() -> (convis::Diagram, Scene) {
    let mut scene = Scene::new();
    let diagram = LayoutBuilder::new(RenderConstants::default())
        .build(&mut scene)
        .unwrap();
    (diagram, scene)
}

#[test]
fn model_frames_fill_every_slot() {
    let (diagram, mut scene) = diagram();
    let data = synthetic::digits(5, 11);
    let net = TinyConvNet::new(28, 28, 11);
    let mut sched = FrameScheduler::new(&SchedulerConfig::default());
    sched.start(Duration::ZERO);

    let report = sched
        .poll(Duration::ZERO, &net, &data, &diagram, &mut scene)
        .unwrap();
    assert_eq!(
        report.frame.stages,
        vec![Stage::Input, Stage::Conv, Stage::Fc, Stage::Softmax]
    );
    assert_eq!(report.frame.top_k.len(), 3);

    let reg = diagram.registry();
    for i in 0..8 {
        let id = reg.image(SlotKey::new(Stage::Conv, Role::Filter(i))).unwrap();
        let img = scene.image(id).unwrap();
        assert_eq!((img.width(), img.height()), (140, 140));
    }
    let class = reg.text(SlotKey::new(Stage::Softmax, Role::ClassText)).unwrap();
    assert!(scene.text(class).unwrap().starts_with("Predicted: "));
}

#[test]
fn scheduler_cycles_through_dataset() {
    let (diagram, mut scene) = diagram();
    let data = synthetic::digits(3, 4);
    let net = TinyConvNet::new(28, 28, 4);
    let mut sched = FrameScheduler::new(&SchedulerConfig::default());
    sched.start(Duration::ZERO);

    let mut indices = Vec::new();
    let mut now = Duration::ZERO;
    for _ in 0..7 {
        let r = sched.poll(now, &net, &data, &diagram, &mut scene).unwrap();
        assert_eq!(r.frame.label, data.get(r.index).unwrap().1);
        indices.push(r.index);
        now += Duration::from_millis(2000);
    }
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn previous_bitmap_is_released_after_swap() {
    let (diagram, mut scene) = diagram();
    let id = diagram
        .registry()
        .image(SlotKey::new(Stage::Conv, Role::Filter(0)))
        .unwrap();
    let before = Arc::clone(scene.image(id).unwrap());
    // eight placeholders share one blank bitmap
    assert_eq!(Arc::strong_count(&before), 9);

    let conv = Tensor::full(vec![1, 8, 4, 4], 2.0);
    let bundle = IntermediatesBundle::new().with(Stage::Conv, conv);
    UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 0);

    assert_eq!(Arc::strong_count(&before), 1);
    assert!(scene.image(id).unwrap().is_uniform(FLAT_MAP_FALLBACK));
}

#[test]
fn partial_diagram_survives_full_frames() {
    let mut scene = Scene::new();
    let diagram = LayoutBuilder::new(RenderConstants::default())
        .without(Stage::Conv)
        .without(Stage::Softmax)
        .build(&mut scene)
        .unwrap();
    let data = synthetic::digits(2, 8);
    let net = TinyConvNet::new(28, 28, 8);
    let mut sched = FrameScheduler::new(&SchedulerConfig::default());
    sched.start(Duration::ZERO);

    let report = sched
        .poll(Duration::ZERO, &net, &data, &diagram, &mut scene)
        .unwrap();
    assert!(report.frame.prediction.is_some());

    // FC fills and outlines still track the frame
    let neuron = diagram
        .registry()
        .shape(SlotKey::new(Stage::Fc, Role::Neuron(0)))
        .unwrap();
    let outline = scene.outline(neuron).unwrap();
    assert!(outline.width >= 1.0);
}

#[test]
fn scene_setters_reject_foreign_ids() {
    let (diagram, mut scene) = diagram();
    let text = diagram
        .registry()
        .text(SlotKey::new(Stage::Input, Role::Text))
        .unwrap();
    scene.set_fill(text, Color::RED);
    assert_eq!(scene.mutations(), 0);
}
