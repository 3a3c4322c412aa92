//! Format negotiation pass.
//!
//! Forward pass in topological order that fixes a memory layout on every
//! tensor. Each node is offered the layouts of its inputs; inputs it rejects
//! get a `LayoutConvert` inserted on the edge, and its outputs are fixed from
//! the layouts it proposes.

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    Acceptance, DataType, Error, FormatStridePair, Graph, LayoutConvertOp, NegotiateCtx,
    Negotiation, NodeId, Pass, Result, Stage, TargetDescriptor, TensorId,
};

/// Externally supplied layout decisions.
#[derive(Debug, Clone, Default)]
pub struct NegotiationOptions {
    /// Layouts for graph inputs. Inputs without an entry get the target's
    /// preferred layout.
    pub input_layouts: HashMap<TensorId, FormatStridePair>,
}

impl NegotiationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix graph input `id` to `layout`.
    pub fn with_input_layout(mut self, id: TensorId, layout: FormatStridePair) -> Self {
        self.input_layouts.insert(id, layout);
        self
    }
}

/// Conversions already inserted, keyed by source tensor and target layout.
type ConversionCache = HashMap<(TensorId, FormatStridePair), TensorId>;

/// Pass that fixes a layout on every tensor of a fully decomposed graph.
pub struct FormatNegotiationPass {
    target: Arc<TargetDescriptor>,
    options: NegotiationOptions,
}

impl FormatNegotiationPass {
    pub fn new(target: Arc<TargetDescriptor>) -> Self {
        Self::with_options(target, NegotiationOptions::default())
    }

    pub fn with_options(target: Arc<TargetDescriptor>, options: NegotiationOptions) -> Self {
        Self { target, options }
    }

    /// Fix every unconstrained graph input.
    fn fix_inputs(&self, graph: &mut Graph) -> Result<bool> {
        if let Some(id) = self
            .options
            .input_layouts
            .keys()
            .find(|&&id| !graph.is_input(id))
        {
            return Err(Error::InvalidGraph(format!(
                "layout override given for {id}, which is not a graph input"
            )));
        }

        let mut changed = false;
        for id in graph.inputs().to_vec() {
            let desc = graph.tensor(id)?;
            if desc.layout().is_fixed() {
                continue;
            }
            let pair = match self.options.input_layouts.get(&id) {
                Some(pair) => pair.clone(),
                None => self.target.preferred_layout(desc.dtype(), desc.shape()),
            };
            if !self.target.supports(&pair, desc.dtype(), desc.shape()) {
                return Err(Error::UnsupportedFormat(format!(
                    "input '{}' cannot be stored as {pair} on target '{}'",
                    desc.name(),
                    self.target.name
                )));
            }
            tracing::debug!(tensor = desc.name(), layout = %pair, "fixed input layout");
            graph.fix_layout(id, pair)?;
            changed = true;
        }
        Ok(changed)
    }

    /// Offer each input of `id` its fixed layout and ask the operator.
    fn negotiate(&self, graph: &Graph, id: NodeId) -> Result<Negotiation> {
        let node = graph.node(id)?;
        let offered = node
            .inputs()
            .iter()
            .map(|&tensor| {
                let desc = graph.tensor(tensor)?;
                desc.fixed_layout()
                    .map(|pair| vec![pair.clone()])
                    .ok_or_else(|| {
                        Error::InvalidGraph(format!(
                            "input '{}' of node '{}' has no layout yet",
                            desc.name(),
                            node.name()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let ctx = NegotiateCtx::new(&self.target, graph, id, &offered)?;
        let negotiation = node.op().negotiate_format(&ctx)?;

        if negotiation.inputs.len() != node.inputs().len()
            || negotiation.outputs.len() != node.outputs().len()
        {
            return Err(Error::InvalidGraph(format!(
                "{} node '{}' answered for {} inputs and {} outputs, expected {} and {}",
                node.kind(),
                node.name(),
                negotiation.inputs.len(),
                negotiation.outputs.len(),
                node.inputs().len(),
                node.outputs().len()
            )));
        }
        Ok(negotiation)
    }

    /// Negotiate one node: convert rejected inputs (retrying once), then fix
    /// its outputs.
    fn negotiate_node(
        &self,
        graph: &mut Graph,
        id: NodeId,
        conversions: &mut ConversionCache,
    ) -> Result<bool> {
        let mut changed = false;
        let mut negotiation = self.negotiate(graph, id)?;

        for attempt in 0..2 {
            let rejected = rejected_inputs(graph, id, &negotiation)?;
            if rejected.is_empty() {
                let fixed = self.fix_outputs(graph, id, &negotiation)?;
                return Ok(changed || fixed);
            }
            if attempt == 1 {
                break;
            }
            for (index, wanted) in rejected {
                self.convert_input(graph, id, index, &wanted, conversions)?;
            }
            changed = true;
            negotiation = self.negotiate(graph, id)?;
        }

        let node = graph.node(id)?;
        Err(Error::UnsupportedFormat(format!(
            "{} node '{}' rejected its inputs again after conversion",
            node.kind(),
            node.name()
        )))
    }

    /// Route input `index` of `consumer` through a conversion to one of
    /// `wanted`, reusing an existing conversion of the same tensor.
    fn convert_input(
        &self,
        graph: &mut Graph,
        consumer: NodeId,
        index: usize,
        wanted: &[FormatStridePair],
        conversions: &mut ConversionCache,
    ) -> Result<()> {
        let node = graph.node(consumer)?;
        let source = *node.inputs().get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no input {index}", node.name()))
        })?;
        let desc = graph.tensor(source)?;

        if wanted.is_empty() {
            return Err(Error::UnsupportedFormat(format!(
                "{} node '{}' rejects '{}' in {} and names no layout it could read",
                node.kind(),
                node.name(),
                desc.name(),
                desc.layout()
            )));
        }
        let choice = self
            .choose_conversion(wanted, desc.dtype(), desc.shape())
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!(
                    "{} node '{}' wants '{}' in one of [{}], none supported by target '{}'",
                    node.kind(),
                    node.name(),
                    desc.name(),
                    wanted
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    self.target.name
                ))
            })?;

        if let Some(&converted) = conversions.get(&(source, choice.clone())) {
            tracing::debug!(tensor = desc.name(), layout = %choice, "reusing conversion");
            return graph.set_input(consumer, index, converted);
        }

        tracing::warn!(
            tensor = desc.name(),
            from = %desc.layout(),
            to = %choice,
            consumer = node.name(),
            "inserting layout conversion"
        );
        let name = format!("{}/convert_{}", desc.name(), conversions.len());
        let convert = graph.insert_on_edge(
            consumer,
            index,
            Arc::new(LayoutConvertOp::new(choice.clone())),
            name,
        )?;

        // Not in the topological snapshot: negotiate it now.
        let negotiation = self.negotiate(graph, convert)?;
        self.fix_outputs(graph, convert, &negotiation)?;

        let converted = graph.node(convert)?.outputs()[0];
        conversions.insert((source, choice), converted);
        Ok(())
    }

    /// Best natively supported layout among `wanted`: the target default if
    /// listed, else the first listed.
    fn choose_conversion(
        &self,
        wanted: &[FormatStridePair],
        dtype: DataType,
        shape: &[usize],
    ) -> Option<FormatStridePair> {
        let preferred = self.target.preferred_layout(dtype, shape);
        let supported: Vec<&FormatStridePair> = wanted
            .iter()
            .filter(|pair| self.target.supports(pair, dtype, shape))
            .collect();
        supported
            .iter()
            .find(|pair| pair.equivalent(&preferred, shape))
            .or(supported.first())
            .map(|pair| (*pair).clone())
    }

    /// Fix each output of `id` to one of its proposals. Returns whether any
    /// output was newly fixed.
    ///
    /// Among natively supported proposals, prefers one continuing an input
    /// layout, then the target default, then the first.
    fn fix_outputs(
        &self,
        graph: &mut Graph,
        id: NodeId,
        negotiation: &Negotiation,
    ) -> Result<bool> {
        let node = graph.node(id)?;
        let inputs = node
            .inputs()
            .iter()
            .map(|&tensor| {
                let desc = graph.tensor(tensor)?;
                Ok((desc.shape(), desc.fixed_layout()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut decisions = Vec::new();
        for (&output, proposals) in node.outputs().iter().zip(&negotiation.outputs) {
            let desc = graph.tensor(output)?;
            let (dtype, shape) = (desc.dtype(), desc.shape());

            if let Some(fixed) = desc.fixed_layout() {
                if !proposals.iter().any(|pair| pair.equivalent(fixed, shape)) {
                    return Err(Error::UnsupportedFormat(format!(
                        "{} node '{}' cannot produce '{}' in its fixed layout {fixed}",
                        node.kind(),
                        node.name(),
                        desc.name()
                    )));
                }
                continue;
            }

            let supported: Vec<&FormatStridePair> = proposals
                .iter()
                .filter(|pair| self.target.supports(pair, dtype, shape))
                .collect();
            let continues_input = |pair: &FormatStridePair| {
                inputs.iter().any(|&(in_shape, in_layout)| {
                    in_layout.is_some_and(|layout| {
                        (in_shape == shape && pair.equivalent(layout, shape))
                            || (in_shape.len() == shape.len() && pair.format == layout.format)
                    })
                })
            };
            let preferred = self.target.preferred_layout(dtype, shape);

            let chosen = supported
                .iter()
                .find(|pair| continues_input(pair))
                .or_else(|| {
                    supported
                        .iter()
                        .find(|pair| pair.equivalent(&preferred, shape))
                })
                .or(supported.first())
                .ok_or_else(|| {
                    Error::UnsupportedFormat(format!(
                        "{} node '{}' proposes no layout for '{}' that target '{}' supports",
                        node.kind(),
                        node.name(),
                        desc.name(),
                        self.target.name
                    ))
                })?;
            tracing::trace!(tensor = desc.name(), layout = %chosen, "fixed output layout");
            decisions.push((output, (*chosen).clone()));
        }

        let fixed = !decisions.is_empty();
        for (output, pair) in decisions {
            graph.fix_layout(output, pair)?;
        }
        Ok(fixed)
    }
}

/// Rejected inputs of `id` with the layouts they want.
fn rejected_inputs(
    graph: &Graph,
    id: NodeId,
    negotiation: &Negotiation,
) -> Result<Vec<(usize, Vec<FormatStridePair>)>> {
    let mut rejected = Vec::new();
    for (index, acceptance) in negotiation.inputs.iter().enumerate() {
        match acceptance {
            Acceptance::Rejected { wanted } => rejected.push((index, wanted.clone())),
            Acceptance::Accepted(layouts) if layouts.is_empty() => {
                let node = graph.node(id)?;
                return Err(Error::UnsupportedFormat(format!(
                    "{} node '{}' accepted no layout for input {index}",
                    node.kind(),
                    node.name()
                )));
            }
            Acceptance::Accepted(_) => {}
        }
    }
    Ok(rejected)
}

impl Pass for FormatNegotiationPass {
    fn name(&self) -> &str {
        "format_negotiation"
    }

    fn stage(&self) -> Stage {
        Stage::Negotiation
    }

    #[tracing::instrument(skip_all, fields(target = %self.target.name))]
    fn run(&self, graph: &mut Graph) -> Result<bool> {
        if let Some(&id) = graph.composite_nodes().first() {
            let node = graph.node(id)?;
            return Err(Error::InvalidGraph(format!(
                "format negotiation needs a fully decomposed graph, found composite {} node '{}'",
                node.kind(),
                node.name()
            )));
        }

        let mut changed = self.fix_inputs(graph)?;

        // Snapshot: conversions inserted along the way are negotiated on insertion.
        let order: Vec<NodeId> = graph.topological_order().collect();
        let mut conversions = ConversionCache::new();
        for id in order {
            changed |= self.negotiate_node(graph, id, &mut conversions)?;
        }

        if !conversions.is_empty() {
            tracing::debug!(count = conversions.len(), "layout conversions inserted");
        }
        Ok(changed)
    }
}
