#![warn(missing_docs)]
//! Text-format parser for fusion graphs.
//!
//! A small line-oriented format, mainly for fixtures and the CLI:
//!
//! ```text
//! # comment
//! framework npu
//! tensor x f32 32x128        # dims are integers or symbols
//! tensor y f32 32xN
//! node mm MatMul x -> y
//! input x
//! output y
//! hint mm other_node         # pre-seeded candidate pair
//! ```
//!
//! References to undeclared tensors or nodes are errors; every error
//! carries the 1-based source line.

use std::collections::BTreeMap;

use autofuse_ir::{
    ComputeGraph, DataType, Dim, EdgeId, Framework, GraphOp, NodeId, TensorShape,
};

/// Parse failures, each pinned to a source line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// A line does not start with a known directive.
    #[error("line {line}: unknown directive '{directive}'")]
    UnknownDirective {
        /// 1-based source line.
        line: usize,
        /// The offending first token.
        directive: String,
    },
    /// A directive has the wrong number or shape of arguments.
    #[error("line {line}: malformed {directive} directive: {detail}")]
    Malformed {
        /// 1-based source line.
        line: usize,
        /// Directive name.
        directive: &'static str,
        /// What was wrong.
        detail: String,
    },
    /// A tensor name was used before being declared.
    #[error("line {line}: unknown tensor '{name}'")]
    UnknownTensor {
        /// 1-based source line.
        line: usize,
        /// The undeclared name.
        name: String,
    },
    /// A node name was used before being declared.
    #[error("line {line}: unknown node '{name}'")]
    UnknownNode {
        /// 1-based source line.
        line: usize,
        /// The undeclared name.
        name: String,
    },
    /// The same tensor or node name was declared twice.
    #[error("line {line}: duplicate name '{name}'")]
    DuplicateName {
        /// 1-based source line.
        line: usize,
        /// The re-declared name.
        name: String,
    },
    /// The graph itself rejected a node (unknown edge, second producer).
    #[error("line {line}: {source}")]
    Graph {
        /// 1-based source line.
        line: usize,
        /// Underlying graph error.
        source: autofuse_ir::IrError,
    },
}

fn parse_op(token: &str) -> GraphOp {
    match token {
        "MatMul" => GraphOp::MatMul,
        "Conv2d" => GraphOp::Conv2d,
        "Add" => GraphOp::Add,
        "Sub" => GraphOp::Sub,
        "Mul" => GraphOp::Mul,
        "Div" => GraphOp::Div,
        "Relu" => GraphOp::Relu,
        "Sigmoid" => GraphOp::Sigmoid,
        "Softmax" => GraphOp::Softmax,
        "LayerNorm" => GraphOp::LayerNorm,
        "Reshape" => GraphOp::Reshape,
        "Transpose" => GraphOp::Transpose,
        "Concat" => GraphOp::Concat,
        other => GraphOp::Custom {
            op_type: other.to_string(),
        },
    }
}

fn parse_dims(token: &str, line: usize) -> Result<TensorShape, ParseError> {
    let mut dims = Vec::new();
    for part in token.split('x') {
        if part.is_empty() {
            return Err(ParseError::Malformed {
                line,
                directive: "tensor",
                detail: format!("empty dimension in '{token}'"),
            });
        }
        if part.chars().all(|c| c.is_ascii_digit()) {
            let v = part.parse::<u64>().map_err(|e| ParseError::Malformed {
                line,
                directive: "tensor",
                detail: format!("dimension '{part}': {e}"),
            })?;
            dims.push(Dim::Fixed(v));
        } else {
            dims.push(Dim::Sym(part.to_string()));
        }
    }
    Ok(TensorShape { dims })
}

/// Parse a graph from its text form.
pub fn parse(source: &str) -> Result<ComputeGraph, ParseError> {
    let mut graph = ComputeGraph::new();
    let mut tensors: BTreeMap<String, EdgeId> = BTreeMap::new();
    let mut nodes: BTreeMap<String, NodeId> = BTreeMap::new();
    let mut hints: Vec<(NodeId, NodeId)> = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut tokens = text.split_whitespace();
        let Some(directive) = tokens.next() else {
            continue;
        };
        let rest: Vec<&str> = tokens.collect();

        match directive {
            "framework" => {
                let [name] = rest[..] else {
                    return Err(ParseError::Malformed {
                        line,
                        directive: "framework",
                        detail: "expected exactly one framework name".into(),
                    });
                };
                let fwk: Framework =
                    name.parse().map_err(|e: String| ParseError::Malformed {
                        line,
                        directive: "framework",
                        detail: e,
                    })?;
                graph.set_framework(fwk);
            }
            "tensor" => {
                let [name, dtype, dims] = rest[..] else {
                    return Err(ParseError::Malformed {
                        line,
                        directive: "tensor",
                        detail: "expected: tensor <name> <dtype> <dims>".into(),
                    });
                };
                if tensors.contains_key(name) {
                    return Err(ParseError::DuplicateName {
                        line,
                        name: name.to_string(),
                    });
                }
                let dtype: DataType =
                    dtype.parse().map_err(|e: String| ParseError::Malformed {
                        line,
                        directive: "tensor",
                        detail: e,
                    })?;
                let shape = if dims == "?" {
                    None
                } else {
                    Some(parse_dims(dims, line)?)
                };
                let edge = graph.add_edge(autofuse_ir::TensorInfo {
                    name: name.to_string(),
                    dtype,
                    shape,
                });
                tensors.insert(name.to_string(), edge);
            }
            "node" => {
                // node <name> <op> <in,...> -> <out,...>
                let [name, op, ins, arrow, outs] = rest[..] else {
                    return Err(ParseError::Malformed {
                        line,
                        directive: "node",
                        detail: "expected: node <name> <op> <in,...> -> <out,...>".into(),
                    });
                };
                if arrow != "->" {
                    return Err(ParseError::Malformed {
                        line,
                        directive: "node",
                        detail: format!("expected '->', found '{arrow}'"),
                    });
                }
                if nodes.contains_key(name) {
                    return Err(ParseError::DuplicateName {
                        line,
                        name: name.to_string(),
                    });
                }
                let resolve = |list: &str| -> Result<Vec<EdgeId>, ParseError> {
                    list.split(',')
                        .filter(|t| !t.is_empty())
                        .map(|t| {
                            tensors.get(t).copied().ok_or_else(|| ParseError::UnknownTensor {
                                line,
                                name: t.to_string(),
                            })
                        })
                        .collect()
                };
                let inputs = resolve(ins)?;
                let outputs = resolve(outs)?;
                let id = graph
                    .add_node(parse_op(op), inputs, outputs, name)
                    .map_err(|source| ParseError::Graph { line, source })?;
                nodes.insert(name.to_string(), id);
            }
            "input" | "output" => {
                if rest.is_empty() {
                    return Err(ParseError::Malformed {
                        line,
                        directive: if directive == "input" { "input" } else { "output" },
                        detail: "expected at least one tensor name".into(),
                    });
                }
                for list in &rest {
                    for t in list.split(',').filter(|t| !t.is_empty()) {
                        let edge = tensors.get(t).copied().ok_or_else(|| {
                            ParseError::UnknownTensor {
                                line,
                                name: t.to_string(),
                            }
                        })?;
                        if directive == "input" {
                            graph.inputs.push(edge);
                        } else {
                            graph.outputs.push(edge);
                        }
                    }
                }
            }
            "hint" => {
                let [a, b] = rest[..] else {
                    return Err(ParseError::Malformed {
                        line,
                        directive: "hint",
                        detail: "expected: hint <node_a> <node_b>".into(),
                    });
                };
                let na = *nodes.get(a).ok_or_else(|| ParseError::UnknownNode {
                    line,
                    name: a.to_string(),
                })?;
                let nb = *nodes.get(b).ok_or_else(|| ParseError::UnknownNode {
                    line,
                    name: b.to_string(),
                })?;
                hints.push((na, nb));
            }
            other => {
                return Err(ParseError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                });
            }
        }
    }

    if !hints.is_empty() {
        graph.set_hint_pairs(hints);
    }
    Ok(graph)
}
