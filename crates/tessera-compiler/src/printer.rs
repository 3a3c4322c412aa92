//! Textual graph listing for logs and test failures.

use tessera_core::{Graph, Result, TensorId};

/// Render `graph` as one line per node in topological order.
///
/// ```text
/// input x: f32[4, 8] @ row_major[8, 1]
/// relu = Relu(x) -> relu:0: f32[4, 8] @ row_major[8, 1]
/// output relu:0
/// ```
pub fn print_graph(graph: &Graph) -> Result<String> {
    let mut lines = Vec::with_capacity(graph.inputs().len() + graph.node_count() + 1);

    for &id in graph.inputs() {
        lines.push(format!("input {}", describe(graph, id)?));
    }
    for node_id in graph.topological_order() {
        let node = graph.node(node_id)?;
        let inputs = node
            .inputs()
            .iter()
            .map(|&id| graph.tensor(id).map(|desc| desc.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let outputs = node
            .outputs()
            .iter()
            .map(|&id| describe(graph, id))
            .collect::<Result<Vec<_>>>()?;
        lines.push(format!(
            "{} = {}({}) -> {}",
            node.name(),
            node.kind(),
            inputs.join(", "),
            outputs.join(", ")
        ));
    }
    for &id in graph.outputs() {
        lines.push(format!("output {}", graph.tensor(id)?.name()));
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn describe(graph: &Graph, id: TensorId) -> Result<String> {
    let desc = graph.tensor(id)?;
    Ok(format!("{}: {} @ {}", desc.name(), desc.spec(), desc.layout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_core::{DataType, FormatStridePair};
    use tessera_operators::ReluOp;

    #[test]
    fn test_print_graph() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![4, 8]);
        let relu = graph
            .add_operator_inferred(Arc::new(ReluOp::new()), "relu", &[x])
            .unwrap();
        let y = graph.node(relu).unwrap().outputs()[0];
        graph.mark_output(y).unwrap();
        graph.fix_layout(x, FormatStridePair::row_major(&[4, 8])).unwrap();

        let text = print_graph(&graph).unwrap();
        assert_eq!(
            text,
            "input x: f32[4, 8] @ row_major[8, 1]\n\
             relu = Relu(x) -> relu:0: f32[4, 8] @ ?\n\
             output relu:0\n"
        );
    }

    #[test]
    fn test_print_empty_graph() {
        assert_eq!(print_graph(&Graph::new()).unwrap(), "");
    }
}
