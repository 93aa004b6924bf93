use serde::Serialize;

use crate::layout::Diagram;
use crate::registry::{Handle, SlotKey};
use crate::surface::{Color, Outline, Scene};

/// A read-only snapshot of what the diagram is showing.
///
/// Design intent:
/// - Observers cannot mutate the diagram or the scene.
/// - Snapshotting is on-demand and allocates; the update path is unchanged.
/// - Images are summarized (size and mean gray level), not copied.
#[derive(Debug, Clone, Serialize)]
pub struct DiagramSnapshot {
    pub slot_count: usize,
    pub omitted: Vec<String>,
    pub mutations: u64,
    pub slots: Vec<SlotSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub stage: String,
    pub role: String,
    #[serde(flatten)]
    pub content: SlotContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotContent {
    Image { width: usize, height: usize, mean: f32 },
    Shape { fill: Color, outline: Outline },
    Text { text: String, bold: bool },
    /// Handle points at an item the scene no longer describes.
    Missing,
}

pub struct DiagramAdapter<'a> {
    diagram: &'a Diagram,
    scene: &'a Scene,
}

impl<'a> DiagramAdapter<'a> {
    pub fn new(diagram: &'a Diagram, scene: &'a Scene) -> Self {
        Self { diagram, scene }
    }

    pub fn snapshot(&self) -> DiagramSnapshot {
        let registry = self.diagram.registry();
        DiagramSnapshot {
            slot_count: registry.len(),
            omitted: self.diagram.omitted().iter().map(|s| s.to_string()).collect(),
            mutations: self.scene.mutations(),
            slots: registry
                .keys()
                .into_iter()
                .filter_map(|key| self.slot(key))
                .collect(),
        }
    }

    fn slot(&self, key: SlotKey) -> Option<SlotSnapshot> {
        let handle = self.diagram.registry().lookup(key)?;
        Some(SlotSnapshot {
            stage: key.stage.to_string(),
            role: key.role.to_string(),
            content: self.content(handle),
        })
    }

    fn content(&self, handle: Handle) -> SlotContent {
        let id = handle.item();
        let scene = self.scene;
        let content = match handle {
            Handle::Image(_) => scene.image(id).map(|img| {
                let px = img.pixels();
                let mean = if px.is_empty() {
                    0.0
                } else {
                    px.iter().map(|&p| p as f32).sum::<f32>() / px.len() as f32
                };
                SlotContent::Image {
                    width: img.width(),
                    height: img.height(),
                    mean,
                }
            }),
            Handle::Shape(_) => scene
                .fill(id)
                .zip(scene.outline(id))
                .map(|(fill, outline)| SlotContent::Shape { fill, outline }),
            Handle::Text(_) => scene.text(id).zip(scene.font(id)).map(|(text, font)| SlotContent::Text {
                text: text.to_string(),
                bold: font.bold,
            }),
        };
        content.unwrap_or(SlotContent::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConstants;
    use crate::layout::LayoutBuilder;
    use crate::registry::Stage;
    use crate::tensor::{IntermediatesBundle, Tensor};
    use crate::update::UpdateEngine;

    #[test]
    fn snapshot_reflects_latest_frame() {
        let mut scene = Scene::new();
        let diagram = LayoutBuilder::new(RenderConstants::default())
            .build(&mut scene)
            .unwrap();
        let mut probs = vec![0.0; 10];
        probs[2] = 1.0;
        let bundle = IntermediatesBundle::new().with(Stage::Softmax, Tensor::row(probs));
        UpdateEngine::new(&diagram).apply(&mut scene, &bundle, 2);

        let snap = DiagramAdapter::new(&diagram, &scene).snapshot();
        assert_eq!(snap.slot_count, 25);
        assert_eq!(snap.slots.len(), 25);

        let class = snap
            .slots
            .iter()
            .find(|s| s.stage == "softmax" && s.role == "class_text")
            .unwrap();
        assert!(matches!(&class.content, SlotContent::Text { text, .. } if text == "Predicted: 2"));

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["slots"][0]["stage"], "input");
        assert_eq!(json["slots"][0]["kind"], "image");
    }
}
