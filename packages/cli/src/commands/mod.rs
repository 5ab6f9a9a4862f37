pub mod replay;
pub mod simulate;

pub use replay::{replay, ReplayArgs};
pub use simulate::{simulate, SimulateArgs};

use colored::Colorize;
use vellum_document::{Document, ShapeKind, ROOT_ID};
use vellum_editor::{NodeRegistry, OpKind};

/// Print the attached shape tree below the root.
pub(crate) fn print_outline(document: &Document) {
    for child in document.children(ROOT_ID) {
        print_shape(document, &child, 1);
    }
}

fn print_shape(document: &Document, id: &str, depth: usize) {
    let Some(shape) = document.get_shape(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let label = if shape.name.is_empty() { id } else { shape.name.as_str() };
    print!("{}{} {}", indent, format!("{:?}", shape.kind).to_lowercase().dimmed(), label.bright_white());
    if shape.kind == ShapeKind::Text {
        if let Some(text) = &shape.text {
            print!(" {:?}", text.to_plain().trim_end_matches('\n'));
        }
    }
    if !shape.props.is_empty() {
        let props: Vec<String> = shape.props.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        print!(" {}", props.join(" ").dimmed());
    }
    println!();

    for child in &shape.children {
        print_shape(document, child, depth + 1);
    }
}

/// Print the registered op paths as a tree. Intermediate paths are dimmed.
pub(crate) fn print_nodes(registry: &NodeRegistry) {
    for (depth, path, kind) in registry.outline() {
        let selector = path.selectors().last().map(String::as_str).unwrap_or_default();
        let indent = "  ".repeat(depth + 1);
        if kind == OpKind::None {
            println!("{}{}", indent, selector.dimmed());
        } else {
            println!("{}{} {}", indent, selector.bright_white(), format!("{:?}", kind).cyan());
        }
    }
}
