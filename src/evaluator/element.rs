//! Lazily evaluated elements.
//!
//! Each GraphQL definition evaluates into one of four element variants. An
//! [`Element`] wraps a `define` closure, synchronous or asynchronous, whose
//! result is the serializable [`Prebuild`] payload downstream consumers read.
//! The default closures are synthesized from the analyzed definition
//! expression; hosts may also register hand-built elements.

use crate::{
    analyzer::ModuleDefinition,
    error::{BuildError, Result},
    identity::CanonicalId,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, pin::Pin, sync::Arc};

/// First backtick block inside a definition expression; the embedded GraphQL
/// document.
static RE_EMBEDDED_DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)`([^`]*)`").unwrap());

/// `typename: "User"` inside a model definition body.
static RE_TYPENAME_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"typename\s*:\s*["']([A-Za-z_][A-Za-z0-9_]*)["']"#).unwrap()
});

/// `$.a.b` projection selectors inside a slice definition body.
static RE_PROJECTION_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\.[A-Za-z_][A-Za-z0-9_]*)+").unwrap());

/// The four element variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Fragment,
    Operation,
    Model,
    Slice,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Fragment => "fragment",
            ElementKind::Operation => "operation",
            ElementKind::Model => "model",
            ElementKind::Slice => "slice",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

/// Serializable evaluation result of one element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Prebuild {
    Fragment(FragmentPrebuild),
    Operation(OperationPrebuild),
    Model(ModelPrebuild),
    Slice(SlicePrebuild),
}

impl Prebuild {
    pub fn kind(&self) -> ElementKind {
        match self {
            Prebuild::Fragment(_) => ElementKind::Fragment,
            Prebuild::Operation(_) => ElementKind::Operation,
            Prebuild::Model(_) => ElementKind::Model,
            Prebuild::Slice(_) => ElementKind::Slice,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentPrebuild {
    pub name: Option<String>,
    pub type_condition: Option<String>,
    pub document: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPrebuild {
    pub operation_type: OperationType,
    pub name: Option<String>,
    pub document: Option<String>,
    pub variable_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrebuild {
    pub typename: Option<String>,
    /// The definition expression, carried for downstream type emitters.
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlicePrebuild {
    /// `$.a.b` selector paths, opaque to the builder.
    pub projection_paths: Vec<String>,
    pub source: String,
}

pub type SyncDefine = Box<dyn Fn() -> Result<Prebuild> + Send + Sync>;
pub type DefineFuture = Pin<Box<dyn Future<Output = Result<Prebuild>> + Send>>;
pub type AsyncDefine = Box<dyn Fn() -> DefineFuture + Send + Sync>;

enum DefineBody {
    Sync(SyncDefine),
    Async(AsyncDefine),
}

/// A lazily evaluated element.
pub struct Element {
    kind: ElementKind,
    define: DefineBody,
}

impl Element {
    pub fn new_sync(
        kind: ElementKind,
        define: impl Fn() -> Result<Prebuild> + Send + Sync + 'static,
    ) -> Self {
        Self { kind, define: DefineBody::Sync(Box::new(define)) }
    }

    pub fn new_async(
        kind: ElementKind,
        define: impl Fn() -> DefineFuture + Send + Sync + 'static,
    ) -> Self {
        Self { kind, define: DefineBody::Async(Box::new(define)) }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn is_async(&self) -> bool {
        matches!(self.define, DefineBody::Async(_))
    }

    /// Runs the define closure synchronously. Asynchronous defines cannot run
    /// here and surface as evaluation failures.
    pub fn define_sync(&self) -> Result<Prebuild> {
        match &self.define {
            DefineBody::Sync(define) => define(),
            DefineBody::Async(_) => Err(BuildError::msg(
                "element has an asynchronous define; evaluate the build asynchronously",
            )),
        }
    }

    /// Defers the define closure; synchronous defines resolve immediately.
    pub fn define_deferred(&self) -> DefineFuture {
        match &self.define {
            DefineBody::Sync(define) => {
                let result = define();
                Box::pin(std::future::ready(result))
            }
            DefineBody::Async(define) => define(),
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("kind", &self.kind)
            .field("async", &self.is_async())
            .finish()
    }
}

/// An element registered under its canonical id.
#[derive(Clone, Debug)]
pub struct ElementHandle {
    pub id: CanonicalId,
    pub element: Arc<Element>,
}

impl ElementHandle {
    pub fn new(id: CanonicalId, element: Element) -> Self {
        Self { id, element: Arc::new(element) }
    }
}

/// Synthesizes the element for an analyzed definition.
///
/// The variant is derived from the helper method in the expression text;
/// expressions that do not look like a helper call produce no element.
pub fn element_from_definition(definition: &ModuleDefinition) -> Option<ElementHandle> {
    let method = helper_method(&definition.expression)?;
    let id = definition.canonical_id.clone();
    let expression = definition.expression.clone();
    let element = match method {
        "fragment" => Element::new_sync(ElementKind::Fragment, move || {
            fragment_prebuild(&expression)
        }),
        "query" => operation_element(expression, OperationType::Query),
        "mutation" => operation_element(expression, OperationType::Mutation),
        "subscription" => operation_element(expression, OperationType::Subscription),
        "model" => Element::new_sync(ElementKind::Model, move || {
            Ok(Prebuild::Model(ModelPrebuild {
                typename: RE_TYPENAME_KEY
                    .captures(&expression)
                    .map(|captures| captures[1].to_string()),
                source: expression.clone(),
            }))
        }),
        "slice" => Element::new_sync(ElementKind::Slice, move || {
            let mut projection_paths: Vec<String> = RE_PROJECTION_PATH
                .find_iter(&expression)
                .map(|found| found.as_str().to_string())
                .collect();
            projection_paths.dedup();
            Ok(Prebuild::Slice(SlicePrebuild { projection_paths, source: expression.clone() }))
        }),
        _ => return None,
    };
    Some(ElementHandle::new(id, element))
}

fn operation_element(expression: String, fallback: OperationType) -> Element {
    Element::new_sync(ElementKind::Operation, move || operation_prebuild(&expression, fallback))
}

/// The helper method named in a definition expression (`gql.fragment(..)` ->
/// `fragment`).
fn helper_method(expression: &str) -> Option<&str> {
    let callee = expression.split('(').next()?;
    callee.rsplit('.').next().map(str::trim).filter(|method| !method.is_empty())
}

/// The embedded GraphQL document of a definition expression, when present.
pub fn embedded_document(expression: &str) -> Option<String> {
    RE_EMBEDDED_DOCUMENT.captures(expression).map(|captures| captures[1].trim().to_string())
}

fn fragment_prebuild(expression: &str) -> Result<Prebuild> {
    let Some(document) = embedded_document(expression) else {
        return Ok(Prebuild::Fragment(FragmentPrebuild {
            name: None,
            type_condition: None,
            document: None,
        }));
    };
    let tree = parse_document(&document)?;
    let mut name = None;
    let mut type_condition = None;
    for definition in tree.document().definitions() {
        if let apollo_parser::cst::Definition::FragmentDefinition(fragment) = definition {
            name = fragment
                .fragment_name()
                .and_then(|fragment_name| fragment_name.name())
                .map(|n| n.text().to_string());
            type_condition = fragment
                .type_condition()
                .and_then(|condition| condition.named_type())
                .and_then(|named| named.name())
                .map(|n| n.text().to_string());
            break;
        }
    }
    Ok(Prebuild::Fragment(FragmentPrebuild { name, type_condition, document: Some(document) }))
}

fn operation_prebuild(expression: &str, fallback: OperationType) -> Result<Prebuild> {
    let Some(document) = embedded_document(expression) else {
        return Ok(Prebuild::Operation(OperationPrebuild {
            operation_type: fallback,
            name: None,
            document: None,
            variable_names: Vec::new(),
        }));
    };
    let tree = parse_document(&document)?;
    let mut operation_type = fallback;
    let mut name = None;
    let mut variable_names = Vec::new();
    for definition in tree.document().definitions() {
        if let apollo_parser::cst::Definition::OperationDefinition(operation) = definition {
            if let Some(declared) = operation.operation_type() {
                if declared.mutation_token().is_some() {
                    operation_type = OperationType::Mutation;
                } else if declared.subscription_token().is_some() {
                    operation_type = OperationType::Subscription;
                } else if declared.query_token().is_some() {
                    operation_type = OperationType::Query;
                }
            }
            name = operation.name().map(|n| n.text().to_string());
            if let Some(definitions) = operation.variable_definitions() {
                for variable_definition in definitions.variable_definitions() {
                    if let Some(variable_name) = variable_definition
                        .variable()
                        .and_then(|variable| variable.name())
                    {
                        variable_names.push(variable_name.text().to_string());
                    }
                }
            }
            break;
        }
    }
    Ok(Prebuild::Operation(OperationPrebuild {
        operation_type,
        name,
        document: Some(document),
        variable_names,
    }))
}

fn parse_document(document: &str) -> Result<apollo_parser::SyntaxTree> {
    let tree = apollo_parser::Parser::new(document).parse();
    if let Some(error) = tree.errors().next() {
        let message = format!("invalid GraphQL document: {}", error.message());
        return Err(BuildError::msg(message));
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn definition(ast_path: &str, expression: &str) -> ModuleDefinition {
        ModuleDefinition {
            canonical_id: CanonicalId::new("/w/a.ts", ast_path).unwrap(),
            ast_path: ast_path.to_string(),
            is_top_level: true,
            is_exported: true,
            export_binding: Some(ast_path.to_string()),
            expression: expression.to_string(),
        }
    }

    #[test]
    fn fragment_prebuild_reads_name_and_type_condition() {
        let handle = element_from_definition(&definition(
            "f_user",
            "gql.fragment(`fragment UserBits on User { id name }`)",
        ))
        .unwrap();
        assert_eq!(handle.element.kind(), ElementKind::Fragment);
        let prebuild = handle.element.define_sync().unwrap();
        assert_eq!(
            prebuild,
            Prebuild::Fragment(FragmentPrebuild {
                name: Some("UserBits".to_string()),
                type_condition: Some("User".to_string()),
                document: Some("fragment UserBits on User { id name }".to_string()),
            })
        );
    }

    #[test]
    fn operation_prebuild_collects_variables() {
        let handle = element_from_definition(&definition(
            "q_user",
            "gql.query(`query User($id: ID!, $full: Boolean) { user(id: $id) { id } }`)",
        ))
        .unwrap();
        let Prebuild::Operation(operation) = handle.element.define_sync().unwrap() else {
            panic!("expected operation prebuild");
        };
        assert_eq!(operation.operation_type, OperationType::Query);
        assert_eq!(operation.name.as_deref(), Some("User"));
        assert_eq!(operation.variable_names, vec!["id", "full"]);
    }

    #[test]
    fn operation_type_prefers_document_over_method() {
        let handle = element_from_definition(&definition(
            "m",
            "gql.query(`mutation Rename { rename { id } }`)",
        ))
        .unwrap();
        let Prebuild::Operation(operation) = handle.element.define_sync().unwrap() else {
            panic!("expected operation prebuild");
        };
        assert_eq!(operation.operation_type, OperationType::Mutation);
    }

    #[test]
    fn model_prebuild_extracts_typename() {
        let handle = element_from_definition(&definition(
            "models.user",
            "gql.model({ typename: \"User\", fields: {} })",
        ))
        .unwrap();
        assert_eq!(handle.element.kind(), ElementKind::Model);
        let Prebuild::Model(model) = handle.element.define_sync().unwrap() else {
            panic!("expected model prebuild");
        };
        assert_eq!(model.typename.as_deref(), Some("User"));
    }

    #[test]
    fn slice_prebuild_extracts_projection_paths() {
        let handle = element_from_definition(&definition(
            "s",
            "gql.slice({ pick: (r) => [$.user.id, $.user.posts] })",
        ))
        .unwrap();
        let Prebuild::Slice(slice) = handle.element.define_sync().unwrap() else {
            panic!("expected slice prebuild");
        };
        assert_eq!(slice.projection_paths, vec!["$.user.id", "$.user.posts"]);
    }

    #[test]
    fn namespaced_helper_calls_resolve_their_method() {
        let handle = element_from_definition(&definition(
            "f",
            "runtime.gql.fragment(`fragment F on T { id }`)",
        ))
        .unwrap();
        assert_eq!(handle.element.kind(), ElementKind::Fragment);
    }

    #[test]
    fn invalid_documents_fail_evaluation() {
        let handle =
            element_from_definition(&definition("broken", "gql.query(`query {{{`)")).unwrap();
        let err = handle.element.define_sync().unwrap_err();
        assert!(err.to_string().contains("invalid GraphQL document"));
    }

    #[test]
    fn async_defines_refuse_sync_evaluation() {
        let element = Element::new_async(ElementKind::Model, || {
            Box::pin(std::future::ready(Ok(Prebuild::Model(ModelPrebuild {
                typename: None,
                source: String::new(),
            }))))
        });
        assert!(element.is_async());
        let err = element.define_sync().unwrap_err();
        assert!(err.to_string().contains("asynchronous define"));
    }

    #[test]
    fn sync_defines_can_be_deferred() {
        let element = Element::new_sync(ElementKind::Model, || {
            Ok(Prebuild::Model(ModelPrebuild { typename: None, source: "x".to_string() }))
        });
        let future = element.define_deferred();
        let prebuild = futures_executor_block_on(future).unwrap();
        assert_eq!(prebuild.kind(), ElementKind::Model);
    }

    // minimal block_on for a future that is already ready
    fn futures_executor_block_on<T>(
        mut future: Pin<Box<dyn Future<Output = T> + Send>>,
    ) -> T {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut context = Context::from_waker(&waker);
        match future.as_mut().poll(&mut context) {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("future was not ready"),
        }
    }
}
