// ============================================================
// Layer 5 — ML / Network Layer (Burn)
// ============================================================
// This layer contains the Burn framework specific code.
// The domain layer never imports burn; the data layer only
// uses its Dataset trait.
//
// What's in this layer:
//
//   tensor.rs     — ShapedTensor: a [rows, width] tensor plus
//                   the extents of its [Time..., Batch] axes
//   summary.rs    — collapses tensors into one flat matrix per
//                   example (or per outer time step)
//   params.rs     — the parameter arena: NetworkPlan (planning)
//                   and SchemaNetwork (the burn Module)
//   network.rs    — declarative layer lists → planned dense /
//                   recurrent / single-step stacks
//   components/   — one component per schema variable
//   graph.rs      — wires two component trees and a loss
//   trainer.rs    — optimizer, iteration, evaluation, export
//
// Backends: ndarray by default, wgpu with the `gpu` feature;
// training always wraps the backend in Autodiff.
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Shape-tracked tensors and host conversion
pub mod tensor;

/// Summary reducer
pub mod summary;

/// Parameter arena
pub mod params;

/// Elementary network builder and layer catalogue
pub mod network;

/// Schema components: number, classification, word, object, sequence
pub mod components;

/// Transform and matching graphs
pub mod graph;

/// Training session and epoch loop
pub mod trainer;

#[cfg(not(feature = "gpu"))]
pub type InnerBackend = burn::backend::NdArray;
#[cfg(feature = "gpu")]
pub type InnerBackend = burn::backend::Wgpu;

/// Backend every session trains on.
pub type TrainBackend = burn::backend::Autodiff<InnerBackend>;

pub fn default_device() -> <InnerBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}
