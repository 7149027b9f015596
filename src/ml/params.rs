// ============================================================
// Layer 5 — Parameter Arena
// ============================================================
// Planning a graph never touches a device. Every layer the
// components need is registered here as a slot, and the whole
// plan is initialised in one go into a `SchemaNetwork`, a burn
// Module whose fields are flat vectors of layers:
//
//   plan.add_linear(300, 1)  → slot 0 of `linears`
//   plan.add_lstm(64, 100)   → slot 0 of `lstms`
//   ...
//   plan.init::<B>(&device)  → SchemaNetwork<B>
//
// Components keep only slot indices, so the component tree
// stays a plain structural value and the Module derive only
// ever sees vectors of burn layers.

use burn::{
    nn::{
        gru::{Gru, GruConfig},
        lstm::{Lstm, LstmConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSize {
    pub d_input:  usize,
    pub d_output: usize,
}

/// Every layer a graph needs, by kind, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPlan {
    pub linears:    Vec<LayerSize>,
    pub lstms:      Vec<LayerSize>,
    pub grus:       Vec<LayerSize>,
    pub embeddings: Vec<LayerSize>,
    pub dropouts:   Vec<f64>,
}

impl NetworkPlan {
    pub fn add_linear(&mut self, d_input: usize, d_output: usize) -> usize {
        self.linears.push(LayerSize { d_input, d_output });
        self.linears.len() - 1
    }

    pub fn add_lstm(&mut self, d_input: usize, d_hidden: usize) -> usize {
        self.lstms.push(LayerSize { d_input, d_output: d_hidden });
        self.lstms.len() - 1
    }

    pub fn add_gru(&mut self, d_input: usize, d_hidden: usize) -> usize {
        self.grus.push(LayerSize { d_input, d_output: d_hidden });
        self.grus.len() - 1
    }

    /// `n_slots` rows of width `d_model`.
    pub fn add_embedding(&mut self, n_slots: usize, d_model: usize) -> usize {
        self.embeddings.push(LayerSize { d_input: n_slots, d_output: d_model });
        self.embeddings.len() - 1
    }

    pub fn add_dropout(&mut self, prob: f64) -> usize {
        self.dropouts.push(prob);
        self.dropouts.len() - 1
    }

    pub fn layer_count(&self) -> usize {
        self.linears.len() + self.lstms.len() + self.grus.len() + self.embeddings.len() + self.dropouts.len()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SchemaNetwork<B> {
        let linears = self
            .linears
            .iter()
            .map(|s| LinearConfig::new(s.d_input, s.d_output).init(device))
            .collect();
        let lstms = self
            .lstms
            .iter()
            .map(|s| LstmConfig::new(s.d_input, s.d_output, true).init(device))
            .collect();
        let grus = self
            .grus
            .iter()
            .map(|s| GruConfig::new(s.d_input, s.d_output, true).init(device))
            .collect();
        let embeddings = self
            .embeddings
            .iter()
            .map(|s| EmbeddingConfig::new(s.d_input, s.d_output).init(device))
            .collect();
        let dropouts = self.dropouts.iter().map(|p| DropoutConfig::new(*p).init()).collect();

        tracing::debug!(
            "Initialised network: {} linear, {} lstm, {} gru, {} embedding, {} dropout",
            self.linears.len(), self.lstms.len(), self.grus.len(),
            self.embeddings.len(), self.dropouts.len(),
        );
        SchemaNetwork { linears, lstms, grus, embeddings, dropouts }
    }
}

/// All trainable parameters of one schema graph.
#[derive(Module, Debug)]
pub struct SchemaNetwork<B: Backend> {
    pub linears:    Vec<Linear<B>>,
    pub lstms:      Vec<Lstm<B>>,
    pub grus:       Vec<Gru<B>>,
    pub embeddings: Vec<Embedding<B>>,
    pub dropouts:   Vec<Dropout>,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_slots_are_assigned_in_order() {
        let mut plan = NetworkPlan::default();
        assert_eq!(plan.add_linear(4, 8), 0);
        assert_eq!(plan.add_linear(8, 1), 1);
        assert_eq!(plan.add_lstm(8, 16), 0);
        assert_eq!(plan.layer_count(), 3);
    }

    #[test]
    fn test_init_builds_one_module_per_slot() {
        let mut plan = NetworkPlan::default();
        plan.add_linear(4, 8);
        plan.add_gru(8, 6);
        plan.add_embedding(11, 3);
        plan.add_dropout(0.5);
        let net: SchemaNetwork<NdArray> = plan.init(&Default::default());
        assert_eq!(net.linears.len(), 1);
        assert_eq!(net.grus.len(), 1);
        assert_eq!(net.embeddings.len(), 1);
        assert_eq!(net.dropouts.len(), 1);
        assert_eq!(net.linears[0].weight.val().dims(), [4, 8]);
    }
}
