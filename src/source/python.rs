use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

use super::{Binding, CallSite, Receiver, ScopeFacts};
use crate::graph::node::NodeKind;
use crate::pipeline::canonical::{callable_kind, child_path};

// One parser per rayon worker thread.
thread_local! {
    static PARSER_PY: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        p.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        p
    });
}

/// Dotted identifier, optionally quoted (forward reference).
fn simple_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^["']?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)["']?$"#).unwrap()
    })
}

/// Scan one Python file and return its scope facts keyed by canonical scope path.
///
/// `file` is the normalized file path; it is the root of every returned path. Reuses the
/// per-thread parser, so this is safe to call from rayon workers.
pub fn scan_python(file: &str, source: &[u8]) -> Result<BTreeMap<String, ScopeFacts>> {
    let tree = PARSER_PY
        .with(|p| p.borrow_mut().parse(source, None))
        .ok_or_else(|| anyhow!("tree-sitter returned None for {file}"))?;
    Ok(scan_tree(file, &tree, source))
}

fn scan_tree(file: &str, tree: &Tree, source: &[u8]) -> BTreeMap<String, ScopeFacts> {
    let mut scanner = Scanner {
        source,
        scopes: BTreeMap::new(),
    };
    let module = Container {
        path: file.to_owned(),
        is_class: false,
    };
    scanner.visit(tree.root_node(), &module);
    scanner.scopes
}

/// The definition a statement is nested in.
struct Container {
    path: String,
    is_class: bool,
}

struct Scanner<'a> {
    source: &'a [u8],
    scopes: BTreeMap<String, ScopeFacts>,
}

impl<'a> Scanner<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn visit(&mut self, node: Node, container: &Container) {
        match node.kind() {
            "class_definition" => self.class(node, container),
            "function_definition" => self.function(node, container, &[]),
            "decorated_definition" => {
                let Some(definition) = node.child_by_field_name("definition") else {
                    return;
                };
                if definition.kind() == "function_definition" {
                    let decorators = self.decorator_names(node);
                    self.function(definition, container, &decorators);
                } else {
                    self.visit(definition, container);
                }
            }
            _ => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.visit(child, container);
                }
            }
        }
    }

    fn class(&mut self, node: Node, container: &Container) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let class = Container {
            path: child_path(&container.path, NodeKind::Class, name),
            is_class: true,
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body, &class);
        }
    }

    fn function(&mut self, node: Node, container: &Container, decorators: &[&str]) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let kind = callable_kind(container.is_class, name);
        let path = child_path(&container.path, kind, name);

        let mut facts = ScopeFacts::default();
        if let Some(params) = node.child_by_field_name("parameters") {
            if container.is_class && !decorators.contains(&"staticmethod") {
                facts.receiver = self.first_parameter(params);
            }
            self.parameters(params, &mut facts);
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.collect_scope(body, &mut facts);
            if let Some(receiver) = facts.receiver.clone() {
                self.collect_attributes(body, &receiver, &mut facts.self_attributes);
            }
            let scope = Container {
                path: path.clone(),
                is_class: false,
            };
            self.scopes.insert(path, facts);
            self.visit(body, &scope);
        } else {
            self.scopes.insert(path, facts);
        }
    }

    fn decorator_names(&self, decorated: Node) -> Vec<&'a str> {
        let mut cursor = decorated.walk();
        decorated
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| self.text(c).trim_start_matches('@').trim())
            .collect()
    }

    fn first_parameter(&self, params: Node) -> Option<String> {
        let mut cursor = params.walk();
        let first = params.named_children(&mut cursor).next()?;
        let ident = match first.kind() {
            "identifier" => first,
            "typed_parameter" => {
                let mut inner = first.walk();
                let found = first
                    .named_children(&mut inner)
                    .find(|c| c.kind() == "identifier");
                found?
            }
            "default_parameter" | "typed_default_parameter" => first.child_by_field_name("name")?,
            _ => return None,
        };
        Some(self.text(ident).to_owned())
    }

    /// Every parameter except the receiver, typed when annotated with a plain class name.
    fn parameters(&self, params: Node, facts: &mut ScopeFacts) {
        let mut cursor = params.walk();
        let mut named = params.named_children(&mut cursor);
        if facts.receiver.is_some() {
            named.next();
        }
        for param in named {
            let (name, annotation) = match param.kind() {
                "identifier" => (Some(param), None),
                "typed_parameter" => {
                    let mut inner = param.walk();
                    let ident = param
                        .named_children(&mut inner)
                        .find(|c| c.kind() == "identifier");
                    (ident, param.child_by_field_name("type"))
                }
                "default_parameter" => (param.child_by_field_name("name"), None),
                "typed_default_parameter" => (
                    param.child_by_field_name("name"),
                    param.child_by_field_name("type"),
                ),
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let mut inner = param.walk();
                    let ident = param
                        .named_children(&mut inner)
                        .find(|c| c.kind() == "identifier");
                    (ident, None)
                }
                _ => continue,
            };
            let Some(name) = name else {
                continue;
            };
            facts.bindings.push(Binding {
                name: self.text(name).to_owned(),
                line: line_of(name),
                type_name: annotation.and_then(|a| simple_type_name(self.text(a))),
            });
        }
    }

    /// Calls and bindings of this scope only; nested definitions are separate scopes, except
    /// that a `nonlocal` inside one rebinds a name here.
    fn collect_scope(&self, node: Node, facts: &mut ScopeFacts) {
        match node.kind() {
            "function_definition" | "class_definition" | "decorated_definition" => {
                self.collect_nonlocals(node, facts);
                return;
            }
            "call" => {
                if let Some(site) = self.call_site(node) {
                    facts.call_sites.push(site);
                }
            }
            "assignment" => match self.binding(node) {
                Some(binding) => facts.bindings.push(binding),
                None => self.bind_field(node, "left", facts),
            },
            "augmented_assignment" | "for_statement" => self.bind_field(node, "left", facts),
            // `with ... as x`, `except E as x`, `case ... as x`
            "as_pattern" => self.bind_field(node, "alias", facts),
            "except_clause" | "except_group_clause" => self.bind_except_alias(node, facts),
            "named_expression" => self.bind_field(node, "name", facts),
            "aliased_import" => {
                self.bind_field(node, "alias", facts);
                return;
            }
            "import_statement" | "import_from_statement" => {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    if name.kind() == "dotted_name" {
                        let mut inner = name.walk();
                        let segments: Vec<Node> = name.named_children(&mut inner).collect();
                        let bound = if node.kind() == "import_statement" {
                            segments.first()
                        } else {
                            segments.last()
                        };
                        if let Some(&ident) = bound {
                            self.bind_untyped(ident, facts);
                        }
                    }
                }
            }
            "global_statement" | "nonlocal_statement" | "case_pattern" => {
                self.bind_all_identifiers(node, facts);
                return;
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_scope(child, facts);
        }
    }

    /// Untyped bindings for every name in the target held by `field`.
    fn bind_field(&self, node: Node, field: &str, facts: &mut ScopeFacts) {
        if let Some(target) = node.child_by_field_name(field) {
            self.bind_target(target, facts);
        }
    }

    /// Names bound by an assignment-like target. Attribute and subscript targets bind nothing.
    fn bind_target(&self, target: Node, facts: &mut ScopeFacts) {
        match target.kind() {
            "identifier" => self.bind_untyped(target, facts),
            // `as x` aliases the bare identifier itself
            "as_pattern_target" if target.named_child_count() == 0 => self.bind_untyped(target, facts),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" | "list_splat"
            | "as_pattern_target" => {
                let mut cursor = target.walk();
                for child in target.named_children(&mut cursor) {
                    self.bind_target(child, facts);
                }
            }
            _ => {}
        }
    }

    /// `except E as x`: the target after `as`, whether or not the grammar labels it.
    fn bind_except_alias(&self, clause: Node, facts: &mut ScopeFacts) {
        if clause.child_by_field_name("alias").is_some() {
            self.bind_field(clause, "alias", facts);
            return;
        }
        let mut cursor = clause.walk();
        let mut after_as = false;
        for child in clause.children(&mut cursor) {
            if after_as {
                self.bind_target(child, facts);
                return;
            }
            after_as = child.kind() == "as";
        }
    }

    fn bind_all_identifiers(&self, node: Node, facts: &mut ScopeFacts) {
        if node.kind() == "identifier" {
            self.bind_untyped(node, facts);
            return;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.bind_all_identifiers(child, facts);
        }
    }

    fn collect_nonlocals(&self, node: Node, facts: &mut ScopeFacts) {
        if node.kind() == "nonlocal_statement" {
            self.bind_all_identifiers(node, facts);
            return;
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_nonlocals(child, facts);
        }
    }

    fn bind_untyped(&self, ident: Node, facts: &mut ScopeFacts) {
        facts
            .bindings
            .push(Binding::untyped(self.text(ident), line_of(ident)));
    }

    fn call_site(&self, call: Node) -> Option<CallSite> {
        let function = call.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => Some(CallSite {
                line: line_of(function),
                receiver: Receiver::Bare,
                callee: self.text(function).to_owned(),
            }),
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let attr = function.child_by_field_name("attribute")?;
                let receiver = if object.kind() == "identifier" {
                    Receiver::Named(self.text(object).to_owned())
                } else {
                    Receiver::Expression
                };
                Some(CallSite {
                    line: line_of(attr),
                    receiver,
                    callee: self.text(attr).to_owned(),
                })
            }
            _ => None,
        }
    }

    /// `x = C(...)` or `x: C = ...`; `None` unless the target is a single name.
    fn binding(&self, assignment: Node) -> Option<Binding> {
        let left = assignment.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            return None;
        }
        let annotated = assignment
            .child_by_field_name("type")
            .and_then(|t| simple_type_name(self.text(t)));
        let constructed = assignment
            .child_by_field_name("right")
            .filter(|r| r.kind() == "call")
            .and_then(|r| r.child_by_field_name("function"))
            .and_then(|f| match f.kind() {
                "identifier" => Some(self.text(f).to_owned()),
                "attribute" => f
                    .child_by_field_name("attribute")
                    .map(|a| self.text(a).to_owned()),
                _ => None,
            });
        Some(Binding {
            name: self.text(left).to_owned(),
            line: line_of(left),
            type_name: annotated.or(constructed),
        })
    }

    /// `<receiver>.<name>` reads and writes, descending into closures but not nested classes.
    fn collect_attributes(&self, node: Node, receiver: &str, out: &mut BTreeSet<String>) {
        if node.kind() == "class_definition" {
            return;
        }
        if node.kind() == "attribute"
            && let (Some(object), Some(attr)) = (
                node.child_by_field_name("object"),
                node.child_by_field_name("attribute"),
            )
            && object.kind() == "identifier"
            && self.text(object) == receiver
        {
            out.insert(self.text(attr).to_owned());
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.collect_attributes(child, receiver, out);
        }
    }
}

fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Reduce an annotation to a bare class name, or `None` for anything generic/compound.
fn simple_type_name(annotation: &str) -> Option<String> {
    let caps = simple_type_re().captures(annotation.trim())?;
    let dotted = caps.get(1)?.as_str();
    dotted.rsplit('.').next().map(str::to_owned)
}
