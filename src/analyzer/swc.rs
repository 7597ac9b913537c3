//! TypeScript analyzer backend built on swc.
//!
//! Parses `.ts`/`.tsx` sources, locates the GraphQL helper binding imported
//! from the configured runtime modules, and walks declarations to emit
//! definitions with their naming paths. Naming path segments are variable
//! names, function/method/class names and object property keys; unnamed
//! arrow functions inject `arrow#N` segments and anonymous class/function
//! expressions fall back to `_class_N`/`_function_N`, all counted per file
//! starting at 1.

use super::{
    AnalyzerInput, AnalyzerOptions, AstAnalyzer, Diagnostic, DiagnosticKind, ImportKind,
    LineIndex, ModuleAnalysis, ModuleDefinition, ModuleExport, ModuleImport,
};
use crate::{
    error::{BuildError, Result},
    fingerprint,
    identity::CanonicalId,
};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};
use swc_common::{sync::Lrc, BytePos, FileName, SourceMap, Span, Spanned};
use swc_ecma_ast as ast;
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};

/// Helper methods that introduce definitions.
const DEFINITION_METHODS: &[&str] =
    &["fragment", "query", "mutation", "subscription", "model", "slice"];

/// Production analyzer backend.
#[derive(Clone, Debug, Default)]
pub struct SwcAnalyzer {
    options: AnalyzerOptions,
}

impl SwcAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }
}

impl AstAnalyzer for SwcAnalyzer {
    fn analyzer_id(&self) -> &'static str {
        "swc-ts-1"
    }

    fn analyze(&self, input: AnalyzerInput<'_>) -> Result<ModuleAnalysis> {
        let signature = fingerprint::content_hash(input.source);
        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(
            FileName::Real(input.file_path.to_path_buf()).into(),
            input.source.to_string(),
        );

        let tsx = matches!(
            input.file_path.extension().and_then(|ext| ext.to_str()),
            Some("tsx") | Some("jsx")
        );
        let syntax = if input.file_path.extension().and_then(|ext| ext.to_str())
            == Some("js")
        {
            Syntax::Es(EsSyntax::default())
        } else {
            Syntax::Typescript(TsSyntax { tsx, ..Default::default() })
        };

        let lexer = Lexer::new(syntax, ast::EsVersion::EsNext, StringInput::from(&*fm), None);
        let mut parser = Parser::new_from(lexer);

        let mut walker = ModuleWalker::new(input.file_path, input.source, fm.start_pos, &self.options);

        let module = match parser.parse_module() {
            Ok(module) => module,
            Err(err) => {
                let span = err.span();
                let message = err.into_kind().msg().to_string();
                walker.push_diagnostic(DiagnosticKind::ParseError, message, span);
                return walker.finish(input.file_path, signature);
            }
        };
        for err in parser.take_errors() {
            let span = err.span();
            let message = err.into_kind().msg().to_string();
            walker.push_diagnostic(DiagnosticKind::ParseError, message, span);
        }

        walker.collect_imports(&module);
        walker.collect_exports(&module);
        walker.walk_module(&module)?;
        walker.finish(input.file_path, signature)
    }
}

/// What a call expression's callee turned out to be.
enum CalleeClass {
    /// `helper.method(...)` with a recognized definition method.
    Definition { method: String },
    /// A member call on the helper with an unrecognized method; plain API use.
    HelperApi,
    /// Unrelated call; arguments are still walked.
    Unrelated,
    /// Malformed use of the helper; diagnosed, never a definition.
    Malformed(DiagnosticKind),
}

struct ModuleWalker<'a> {
    file_path: &'a Path,
    source: &'a str,
    base: BytePos,
    options: &'a AnalyzerOptions,
    line_index: LineIndex,

    /// Local bindings that resolve to the helper itself.
    helper_locals: HashSet<String>,
    /// Star-import locals of the runtime modules (`ns.gql.query(...)`).
    namespace_locals: HashSet<String>,
    /// local binding -> exported name.
    export_map: HashMap<String, String>,

    imports: Vec<ModuleImport>,
    exports: Vec<ModuleExport>,
    definitions: Vec<ModuleDefinition>,
    diagnostics: Vec<Diagnostic>,

    scope: Vec<String>,
    fn_depth: u32,
    class_prop_depth: u32,
    arrow_counter: u32,
    class_counter: u32,
    function_counter: u32,
}

impl<'a> ModuleWalker<'a> {
    fn new(
        file_path: &'a Path,
        source: &'a str,
        base: BytePos,
        options: &'a AnalyzerOptions,
    ) -> Self {
        Self {
            file_path,
            source,
            base,
            options,
            line_index: LineIndex::new(source),
            helper_locals: HashSet::new(),
            namespace_locals: HashSet::new(),
            export_map: HashMap::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            definitions: Vec::new(),
            diagnostics: Vec::new(),
            scope: Vec::new(),
            fn_depth: 0,
            class_prop_depth: 0,
            arrow_counter: 0,
            class_counter: 0,
            function_counter: 0,
        }
    }

    fn finish(self, file_path: &Path, signature: String) -> Result<ModuleAnalysis> {
        let mut seen = HashSet::new();
        for definition in &self.definitions {
            if !seen.insert(definition.ast_path.clone()) {
                return Err(BuildError::DuplicateDefinitionPath {
                    file_path: file_path.to_path_buf(),
                    ast_path: definition.ast_path.clone(),
                });
            }
        }
        Ok(ModuleAnalysis {
            file_path: file_path.to_path_buf(),
            signature,
            definitions: self.definitions,
            imports: self.imports,
            exports: self.exports,
            diagnostics: self.diagnostics,
        })
    }

    // ---------------------------------------------------------------- spans

    fn span_range(&self, span: Span) -> (usize, usize) {
        let lo = span.lo.0.saturating_sub(self.base.0) as usize;
        let hi = span.hi.0.saturating_sub(self.base.0) as usize;
        (lo.min(self.source.len()), hi.min(self.source.len()))
    }

    fn span_text(&self, span: Span) -> &'a str {
        let (lo, hi) = self.span_range(span);
        &self.source[lo..hi]
    }

    fn push_diagnostic(&mut self, kind: DiagnosticKind, message: impl Into<String>, span: Span) {
        let (start, end) = self.span_range(span);
        self.diagnostics.push(Diagnostic {
            kind,
            message: message.into(),
            location: self.line_index.location(start, end),
        });
    }

    // -------------------------------------------------------------- imports

    fn collect_imports(&mut self, module: &ast::Module) {
        for item in &module.body {
            let ast::ModuleItem::ModuleDecl(ast::ModuleDecl::Import(decl)) = item else {
                continue;
            };
            let source = decl.src.value.to_string();
            let is_runtime = self.options.runtime_modules.iter().any(|m| *m == source);
            for specifier in &decl.specifiers {
                match specifier {
                    ast::ImportSpecifier::Named(named) => {
                        let local = named.local.sym.to_string();
                        let imported = named
                            .imported
                            .as_ref()
                            .map(export_name)
                            .unwrap_or_else(|| local.clone());
                        let is_type_only = decl.type_only || named.is_type_only;
                        self.imports.push(ModuleImport {
                            source: source.clone(),
                            local: local.clone(),
                            kind: ImportKind::Named,
                            is_type_only,
                        });
                        if is_runtime && !is_type_only && imported == self.options.helper_name {
                            if local != imported {
                                self.push_diagnostic(
                                    DiagnosticKind::RenamedHelperImport,
                                    format!(
                                        "helper import renamed to `{local}`; tooling may not \
                                         recognize it"
                                    ),
                                    named.span,
                                );
                            }
                            self.helper_locals.insert(local);
                        }
                    }
                    ast::ImportSpecifier::Default(default) => {
                        let local = default.local.sym.to_string();
                        self.imports.push(ModuleImport {
                            source: source.clone(),
                            local: local.clone(),
                            kind: ImportKind::Default,
                            is_type_only: decl.type_only,
                        });
                        if is_runtime && !decl.type_only {
                            self.push_diagnostic(
                                DiagnosticKind::DefaultHelperImport,
                                "helper imported through the default export",
                                default.span,
                            );
                            self.helper_locals.insert(local);
                        }
                    }
                    ast::ImportSpecifier::Namespace(namespace) => {
                        let local = namespace.local.sym.to_string();
                        self.imports.push(ModuleImport {
                            source: source.clone(),
                            local: local.clone(),
                            kind: ImportKind::Namespace,
                            is_type_only: decl.type_only,
                        });
                        if is_runtime && !decl.type_only {
                            self.push_diagnostic(
                                DiagnosticKind::StarHelperImport,
                                "helper reached through a star import",
                                namespace.span,
                            );
                            self.namespace_locals.insert(local);
                        }
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------- exports

    fn collect_exports(&mut self, module: &ast::Module) {
        for item in &module.body {
            let ast::ModuleItem::ModuleDecl(decl) = item else { continue };
            match decl {
                ast::ModuleDecl::ExportDecl(export) => match &export.decl {
                    ast::Decl::Var(var) => {
                        for declarator in &var.decls {
                            if let ast::Pat::Ident(name) = &declarator.name {
                                self.record_named_export(name.id.sym.to_string(), None, false);
                            }
                        }
                    }
                    ast::Decl::Fn(func) => {
                        self.record_named_export(func.ident.sym.to_string(), None, false);
                    }
                    ast::Decl::Class(class) => {
                        self.record_named_export(class.ident.sym.to_string(), None, false);
                    }
                    ast::Decl::TsInterface(decl) => {
                        self.record_named_export(decl.id.sym.to_string(), None, true);
                    }
                    ast::Decl::TsTypeAlias(decl) => {
                        self.record_named_export(decl.id.sym.to_string(), None, true);
                    }
                    _ => {}
                },
                ast::ModuleDecl::ExportNamed(named) => {
                    let source = named.src.as_ref().map(|src| src.value.to_string());
                    for specifier in &named.specifiers {
                        match specifier {
                            ast::ExportSpecifier::Named(spec) => {
                                let local = export_name(&spec.orig);
                                let exported =
                                    spec.exported.as_ref().map(export_name).unwrap_or_else(|| local.clone());
                                let is_type_only = named.type_only || spec.is_type_only;
                                match &source {
                                    Some(source) => self.exports.push(ModuleExport::Reexport {
                                        exported,
                                        local: Some(local),
                                        source: source.clone(),
                                        is_type_only,
                                    }),
                                    None => self.record_named_export(
                                        local,
                                        Some(exported),
                                        is_type_only,
                                    ),
                                }
                            }
                            ast::ExportSpecifier::Namespace(spec) => {
                                if let Some(source) = &source {
                                    self.exports.push(ModuleExport::Reexport {
                                        exported: export_name(&spec.name),
                                        local: None,
                                        source: source.clone(),
                                        is_type_only: named.type_only,
                                    });
                                }
                            }
                            ast::ExportSpecifier::Default(spec) => {
                                if let Some(source) = &source {
                                    self.exports.push(ModuleExport::Reexport {
                                        exported: "default".to_string(),
                                        local: Some(spec.exported.sym.to_string()),
                                        source: source.clone(),
                                        is_type_only: named.type_only,
                                    });
                                }
                            }
                        }
                    }
                }
                ast::ModuleDecl::ExportDefaultDecl(default) => {
                    let local = match &default.decl {
                        ast::DefaultDecl::Class(class) => {
                            class.ident.as_ref().map(|ident| ident.sym.to_string())
                        }
                        ast::DefaultDecl::Fn(func) => {
                            func.ident.as_ref().map(|ident| ident.sym.to_string())
                        }
                        ast::DefaultDecl::TsInterfaceDecl(_) => None,
                    };
                    if let Some(local) = local {
                        self.record_named_export(local, Some("default".to_string()), false);
                    }
                }
                ast::ModuleDecl::ExportDefaultExpr(default) => {
                    if let ast::Expr::Ident(ident) = &*default.expr {
                        self.record_named_export(
                            ident.sym.to_string(),
                            Some("default".to_string()),
                            false,
                        );
                    }
                }
                ast::ModuleDecl::ExportAll(all) => {
                    self.exports.push(ModuleExport::Reexport {
                        exported: "*".to_string(),
                        local: None,
                        source: all.src.value.to_string(),
                        is_type_only: all.type_only,
                    });
                }
                _ => {}
            }
        }
    }

    fn record_named_export(&mut self, local: String, exported: Option<String>, is_type_only: bool) {
        let exported = exported.unwrap_or_else(|| local.clone());
        self.exports.push(ModuleExport::Named {
            exported: exported.clone(),
            local: local.clone(),
            is_type_only,
        });
        if !is_type_only {
            self.export_map.insert(local, exported);
        }
    }

    // -------------------------------------------------------- definitions

    fn walk_module(&mut self, module: &ast::Module) -> Result<()> {
        for item in &module.body {
            match item {
                ast::ModuleItem::Stmt(stmt) => self.walk_stmt(stmt)?,
                ast::ModuleItem::ModuleDecl(ast::ModuleDecl::ExportDecl(export)) => {
                    self.walk_decl(&export.decl)?;
                }
                ast::ModuleItem::ModuleDecl(ast::ModuleDecl::ExportDefaultDecl(default)) => {
                    match &default.decl {
                        ast::DefaultDecl::Class(class) => self.walk_class_expr(class)?,
                        ast::DefaultDecl::Fn(func) => self.walk_fn_expr(func)?,
                        ast::DefaultDecl::TsInterfaceDecl(_) => {}
                    }
                }
                ast::ModuleItem::ModuleDecl(ast::ModuleDecl::ExportDefaultExpr(default)) => {
                    self.walk_expr(&default.expr)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn walk_stmt(&mut self, stmt: &ast::Stmt) -> Result<()> {
        match stmt {
            ast::Stmt::Decl(decl) => self.walk_decl(decl),
            ast::Stmt::Expr(expr) => self.walk_expr(&expr.expr),
            ast::Stmt::Return(ret) => match &ret.arg {
                Some(arg) => self.walk_expr(arg),
                None => Ok(()),
            },
            ast::Stmt::Block(block) => {
                for stmt in &block.stmts {
                    self.walk_stmt(stmt)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk_decl(&mut self, decl: &ast::Decl) -> Result<()> {
        match decl {
            ast::Decl::Var(var) => {
                for declarator in &var.decls {
                    match (&declarator.name, &declarator.init) {
                        (ast::Pat::Ident(name), Some(init)) => {
                            self.scope.push(name.id.sym.to_string());
                            self.walk_named_value(init)?;
                            self.scope.pop();
                        }
                        (_, Some(init)) => self.walk_expr(init)?,
                        (_, None) => {}
                    }
                }
                Ok(())
            }
            ast::Decl::Fn(func) => {
                self.scope.push(func.ident.sym.to_string());
                self.walk_function(&func.function)?;
                self.scope.pop();
                Ok(())
            }
            ast::Decl::Class(class) => {
                self.scope.push(class.ident.sym.to_string());
                self.walk_class(&class.class)?;
                self.scope.pop();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Walks an expression that already received a name from its context
    /// (variable declarator or object property). Arrows, function and class
    /// expressions in this position do not inject synthetic segments.
    fn walk_named_value(&mut self, expr: &ast::Expr) -> Result<()> {
        match expr {
            ast::Expr::Paren(paren) => self.walk_named_value(&paren.expr),
            ast::Expr::Arrow(arrow) => self.walk_arrow_body(arrow),
            ast::Expr::Fn(func) => self.walk_function(&func.function),
            ast::Expr::Class(class) => self.walk_class(&class.class),
            ast::Expr::Object(object) => self.walk_object(object),
            ast::Expr::TsAs(cast) => self.walk_named_value(&cast.expr),
            ast::Expr::TsConstAssertion(cast) => self.walk_named_value(&cast.expr),
            ast::Expr::TsSatisfies(cast) => self.walk_named_value(&cast.expr),
            ast::Expr::TsNonNull(cast) => self.walk_named_value(&cast.expr),
            other => self.walk_expr(other),
        }
    }

    fn walk_expr(&mut self, expr: &ast::Expr) -> Result<()> {
        match expr {
            ast::Expr::Call(call) => self.handle_call(call),
            ast::Expr::Object(object) => self.walk_object(object),
            ast::Expr::Arrow(arrow) => {
                self.arrow_counter += 1;
                self.scope.push(format!("arrow#{}", self.arrow_counter));
                self.walk_arrow_body(arrow)?;
                self.scope.pop();
                Ok(())
            }
            ast::Expr::Fn(func) => {
                let segment = match &func.ident {
                    Some(ident) => ident.sym.to_string(),
                    None => {
                        self.function_counter += 1;
                        format!("_function_{}", self.function_counter)
                    }
                };
                self.scope.push(segment);
                self.walk_function(&func.function)?;
                self.scope.pop();
                Ok(())
            }
            ast::Expr::Class(class) => {
                let segment = match &class.ident {
                    Some(ident) => ident.sym.to_string(),
                    None => {
                        self.class_counter += 1;
                        format!("_class_{}", self.class_counter)
                    }
                };
                self.scope.push(segment);
                self.walk_class(&class.class)?;
                self.scope.pop();
                Ok(())
            }
            ast::Expr::Paren(paren) => self.walk_expr(&paren.expr),
            ast::Expr::OptChain(chain) => self.walk_opt_chain(chain),
            ast::Expr::Await(await_expr) => self.walk_expr(&await_expr.arg),
            ast::Expr::TsAs(cast) => self.walk_expr(&cast.expr),
            ast::Expr::TsConstAssertion(cast) => self.walk_expr(&cast.expr),
            ast::Expr::TsSatisfies(cast) => self.walk_expr(&cast.expr),
            ast::Expr::TsNonNull(cast) => self.walk_expr(&cast.expr),
            ast::Expr::Assign(assign) => self.walk_expr(&assign.right),
            ast::Expr::Cond(cond) => {
                self.walk_expr(&cond.cons)?;
                self.walk_expr(&cond.alt)
            }
            ast::Expr::Bin(bin) => {
                self.walk_expr(&bin.left)?;
                self.walk_expr(&bin.right)
            }
            ast::Expr::Seq(seq) => {
                for expr in &seq.exprs {
                    self.walk_expr(expr)?;
                }
                Ok(())
            }
            ast::Expr::Array(array) => {
                for element in array.elems.iter().flatten() {
                    self.walk_expr(&element.expr)?;
                }
                Ok(())
            }
            ast::Expr::New(new) => {
                for arg in new.args.iter().flatten() {
                    self.walk_expr(&arg.expr)?;
                }
                Ok(())
            }
            ast::Expr::Tpl(template) => {
                for expr in &template.exprs {
                    self.walk_expr(expr)?;
                }
                Ok(())
            }
            ast::Expr::Member(member) => self.walk_expr(&member.obj),
            _ => Ok(()),
        }
    }

    fn walk_opt_chain(&mut self, chain: &ast::OptChainExpr) -> Result<()> {
        match &*chain.base {
            ast::OptChainBase::Member(member) => self.walk_expr(&member.obj),
            ast::OptChainBase::Call(call) => {
                if self.mentions_helper(self.span_text(call.callee.span())) {
                    self.push_diagnostic(
                        DiagnosticKind::OptionalChainedCallee,
                        malformed_message(DiagnosticKind::OptionalChainedCallee),
                        call.span,
                    );
                }
                for arg in &call.args {
                    self.walk_expr(&arg.expr)?;
                }
                Ok(())
            }
        }
    }

    fn walk_arrow_body(&mut self, arrow: &ast::ArrowExpr) -> Result<()> {
        self.fn_depth += 1;
        let result = match &*arrow.body {
            ast::BlockStmtOrExpr::BlockStmt(block) => {
                let mut result = Ok(());
                for stmt in &block.stmts {
                    result = self.walk_stmt(stmt);
                    if result.is_err() {
                        break;
                    }
                }
                result
            }
            ast::BlockStmtOrExpr::Expr(expr) => self.walk_expr(expr),
        };
        self.fn_depth -= 1;
        result
    }

    fn walk_function(&mut self, function: &ast::Function) -> Result<()> {
        let Some(body) = &function.body else { return Ok(()) };
        self.fn_depth += 1;
        let mut result = Ok(());
        for stmt in &body.stmts {
            result = self.walk_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        self.fn_depth -= 1;
        result
    }

    fn walk_fn_expr(&mut self, func: &ast::FnExpr) -> Result<()> {
        match &func.ident {
            Some(ident) => {
                self.scope.push(ident.sym.to_string());
                let result = self.walk_function(&func.function);
                self.scope.pop();
                result
            }
            None => self.walk_function(&func.function),
        }
    }

    fn walk_class_expr(&mut self, class: &ast::ClassExpr) -> Result<()> {
        match &class.ident {
            Some(ident) => {
                self.scope.push(ident.sym.to_string());
                let result = self.walk_class(&class.class);
                self.scope.pop();
                result
            }
            None => self.walk_class(&class.class),
        }
    }

    fn walk_class(&mut self, class: &ast::Class) -> Result<()> {
        for member in &class.body {
            match member {
                ast::ClassMember::Method(method) => {
                    if let Some(segment) = prop_name(&method.key) {
                        self.scope.push(segment);
                        self.walk_function(&method.function)?;
                        self.scope.pop();
                    }
                }
                ast::ClassMember::Constructor(ctor) => {
                    if let Some(body) = &ctor.body {
                        self.fn_depth += 1;
                        for stmt in &body.stmts {
                            if let Err(err) = self.walk_stmt(stmt) {
                                self.fn_depth -= 1;
                                return Err(err);
                            }
                        }
                        self.fn_depth -= 1;
                    }
                }
                ast::ClassMember::ClassProp(prop) => {
                    if let Some(value) = &prop.value {
                        self.class_prop_depth += 1;
                        let result = self.walk_expr(value);
                        self.class_prop_depth -= 1;
                        result?;
                    }
                }
                ast::ClassMember::PrivateProp(prop) => {
                    if let Some(value) = &prop.value {
                        self.class_prop_depth += 1;
                        let result = self.walk_expr(value);
                        self.class_prop_depth -= 1;
                        result?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn walk_object(&mut self, object: &ast::ObjectLit) -> Result<()> {
        for prop in &object.props {
            match prop {
                ast::PropOrSpread::Spread(spread) => self.walk_expr(&spread.expr)?,
                ast::PropOrSpread::Prop(prop) => match &**prop {
                    ast::Prop::KeyValue(kv) => {
                        if let Some(segment) = prop_name(&kv.key) {
                            self.scope.push(segment);
                            self.walk_named_value(&kv.value)?;
                            self.scope.pop();
                        } else {
                            self.walk_expr(&kv.value)?;
                        }
                    }
                    ast::Prop::Method(method) => {
                        if let Some(segment) = prop_name(&method.key) {
                            self.scope.push(segment);
                            self.walk_function(&method.function)?;
                            self.scope.pop();
                        }
                    }
                    ast::Prop::Getter(getter) => {
                        if let Some(body) = &getter.body {
                            self.fn_depth += 1;
                            for stmt in &body.stmts {
                                if let Err(err) = self.walk_stmt(stmt) {
                                    self.fn_depth -= 1;
                                    return Err(err);
                                }
                            }
                            self.fn_depth -= 1;
                        }
                    }
                    _ => {}
                },
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------- calls

    fn handle_call(&mut self, call: &ast::CallExpr) -> Result<()> {
        match self.classify_callee(call) {
            CalleeClass::Definition { method } => {
                if self.class_prop_depth > 0 {
                    self.push_diagnostic(
                        DiagnosticKind::ClassPropertyDefinition,
                        "definitions inside class properties are not extracted",
                        call.span,
                    );
                    return Ok(());
                }
                self.record_definition(call, &method)
            }
            CalleeClass::Malformed(kind) => {
                self.push_diagnostic(kind, malformed_message(kind), call.span);
                self.walk_call_args(call)
            }
            CalleeClass::HelperApi | CalleeClass::Unrelated => self.walk_call_args(call),
        }
    }

    fn walk_call_args(&mut self, call: &ast::CallExpr) -> Result<()> {
        for arg in &call.args {
            self.walk_expr(&arg.expr)?;
        }
        Ok(())
    }

    fn classify_callee(&mut self, call: &ast::CallExpr) -> CalleeClass {
        let ast::Callee::Expr(callee) = &call.callee else { return CalleeClass::Unrelated };
        match &**callee {
            ast::Expr::Member(member) => {
                let helper_object = self.is_helper_object(&member.obj);
                match &member.prop {
                    ast::MemberProp::Ident(prop) if helper_object => {
                        let method = prop.sym.to_string();
                        if DEFINITION_METHODS.contains(&method.as_str()) {
                            CalleeClass::Definition { method }
                        } else {
                            CalleeClass::HelperApi
                        }
                    }
                    ast::MemberProp::Computed(_) if helper_object => {
                        CalleeClass::Malformed(DiagnosticKind::ComputedCallee)
                    }
                    _ if helper_object => CalleeClass::HelperApi,
                    _ => self.classify_untracked(callee),
                }
            }
            ast::Expr::OptChain(chain) => {
                let base_is_helper = match &*chain.base {
                    ast::OptChainBase::Member(member) => self.is_helper_object(&member.obj),
                    ast::OptChainBase::Call(call) => {
                        self.mentions_helper(self.span_text(call.span()))
                    }
                };
                if base_is_helper {
                    CalleeClass::Malformed(DiagnosticKind::OptionalChainedCallee)
                } else {
                    self.classify_untracked(callee)
                }
            }
            ast::Expr::Ident(ident) if self.helper_locals.contains(ident.sym.as_ref()) => {
                CalleeClass::Malformed(DiagnosticKind::NonMemberCall)
            }
            _ => self.classify_untracked(callee),
        }
    }

    /// The callee was not a recognizable helper shape; if the helper binding
    /// still occurs in the callee text the call is diagnosed as dynamic.
    fn classify_untracked(&self, callee: &ast::Expr) -> CalleeClass {
        if self.mentions_helper(self.span_text(callee.span())) {
            CalleeClass::Malformed(DiagnosticKind::DynamicCallee)
        } else {
            CalleeClass::Unrelated
        }
    }

    fn is_helper_object(&self, object: &ast::Expr) -> bool {
        match object {
            ast::Expr::Ident(ident) => self.helper_locals.contains(ident.sym.as_ref()),
            ast::Expr::Member(member) => {
                let ast::Expr::Ident(namespace) = &*member.obj else { return false };
                let ast::MemberProp::Ident(prop) = &member.prop else { return false };
                self.namespace_locals.contains(namespace.sym.as_ref())
                    && prop.sym.as_ref() == self.options.helper_name
            }
            ast::Expr::Paren(paren) => self.is_helper_object(&paren.expr),
            _ => false,
        }
    }

    /// Standalone occurrence of any helper binding: not a property access
    /// (`foo.gql`) and not part of a longer identifier.
    fn mentions_helper(&self, text: &str) -> bool {
        self.helper_locals
            .iter()
            .chain(self.namespace_locals.iter())
            .any(|binding| word_occurs_unqualified(text, binding))
    }

    fn record_definition(&mut self, call: &ast::CallExpr, _method: &str) -> Result<()> {
        match call.args.first() {
            None => {
                self.push_diagnostic(
                    DiagnosticKind::MissingArgument,
                    "definition call takes a single argument",
                    call.span,
                );
                return Ok(());
            }
            Some(arg) if arg.spread.is_some() => {
                self.push_diagnostic(
                    DiagnosticKind::SpreadArgument,
                    "definition argument cannot be spread",
                    call.span,
                );
                return Ok(());
            }
            Some(arg) if matches!(&*arg.expr, ast::Expr::Lit(_)) => {
                self.push_diagnostic(
                    DiagnosticKind::WrongArgumentType,
                    "definition argument cannot be a primitive literal",
                    call.span,
                );
                return Ok(());
            }
            Some(_) => {}
        }
        if call.args.len() > 1 {
            self.push_diagnostic(
                DiagnosticKind::ExtraArguments,
                "extra definition arguments are ignored",
                call.span,
            );
        }

        // A call with no naming path has no binding to address it by.
        if self.scope.is_empty() {
            return Ok(());
        }

        let ast_path = self.scope.join(".");
        let root = self.scope[0].clone();
        let export_binding = self.export_map.get(&root).cloned();
        self.definitions.push(ModuleDefinition {
            canonical_id: CanonicalId::new(self.file_path, &ast_path)?,
            ast_path,
            is_top_level: self.fn_depth == 0,
            is_exported: export_binding.is_some(),
            export_binding,
            expression: self.span_text(call.span).to_string(),
        });
        Ok(())
    }
}

fn export_name(name: &ast::ModuleExportName) -> String {
    match name {
        ast::ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ast::ModuleExportName::Str(value) => value.value.to_string(),
    }
}

fn prop_name(key: &ast::PropName) -> Option<String> {
    match key {
        ast::PropName::Ident(ident) => Some(ident.sym.to_string()),
        ast::PropName::Str(value) => Some(value.value.to_string()),
        _ => None,
    }
}

fn malformed_message(kind: DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::NonMemberCall => "helper must be called through a member access",
        DiagnosticKind::ComputedCallee => "helper methods cannot be accessed with computed keys",
        DiagnosticKind::OptionalChainedCallee => "helper methods cannot be optional-chained",
        DiagnosticKind::DynamicCallee => "helper reached through an untrackable expression",
        _ => "malformed helper call",
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn word_occurs_unqualified(text: &str, word: &str) -> bool {
    let mut search_from = 0;
    while let Some(found) = text[search_from..].find(word) {
        let start = search_from + found;
        let end = start + word.len();
        let prev = text[..start].chars().next_back();
        let next = text[end..].chars().next();
        let standalone = !prev.map_or(false, is_ident_char) && !next.map_or(false, is_ident_char);
        let qualified = text[..start].trim_end().ends_with('.');
        if standalone && !qualified {
            return true;
        }
        search_from = end;
    }
    false
}
