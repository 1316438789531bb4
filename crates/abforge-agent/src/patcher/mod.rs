//! Source patcher
//!
//! Instruments a named React component with an experiment check. The target is
//! located by one of three strategies; the edit itself (import, marker, fetch,
//! exposure log, parameter binding) is identical whichever strategy found it.
//!
//! Every failure leaves the file exactly as it was: the patched text is built in
//! memory and written only once it is complete.

pub mod fast;
pub mod patterns;
pub mod rollback;
pub mod snippet;
pub mod syntax;

pub use rollback::{create_rollback, has_rollback, restore_from_rollback, rollback_path};

use std::path::{Path, PathBuf};

use abforge_core::contract::{CodeChange, InsertionPoint, WrapStrategy};
use abforge_core::{CodeModificationResult, PatchError};

/// Module the injected import reads from
pub const DEFAULT_EXPERIMENT_MODULE: &str = "@/lib/statsig";

/// How the target declaration is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchStrategy {
    /// TypeScript/TSX syntax tree
    #[default]
    Syntax,
    /// Ordered regex list over source lines
    LineScan,
    /// Literal known declaration lines, then `LineScan`
    Fast,
}

impl PatchStrategy {
    pub const VALUES: &'static [&'static str] = &["syntax", "line-scan", "fast"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "syntax" => Some(Self::Syntax),
            "line-scan" | "linescan" => Some(Self::LineScan),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::LineScan => "line-scan",
            Self::Fast => "fast",
        }
    }
}

/// Rows (0-based) of a located target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration {
    /// First line of the declaration statement, including `export`
    pub decl_line: usize,
    /// Line holding the body's opening brace
    pub body_open_line: usize,
    /// Line holding the body's closing brace, `None` without a block body
    pub body_close_line: Option<usize>,
}

impl Declaration {
    /// True when the body spans more than one line, so lines can go inside it
    pub fn has_multiline_body(&self) -> bool {
        self.body_close_line
            .map(|close| close > self.body_open_line)
            .unwrap_or(false)
    }
}

/// Outcome of a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located {
    Found(Declaration),
    /// The target exists but returns an expression
    NoBlockBody(Declaration),
    NotFound,
}

/// One instrumentation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub file: PathBuf,
    pub function: String,
    pub parameter: String,
    pub experiment_key: String,
    pub wrap_with: WrapStrategy,
    pub insertion_point: InsertionPoint,
    pub custom_code: Option<String>,
}

impl PatchRequest {
    pub fn new(
        file: impl Into<PathBuf>,
        function: impl Into<String>,
        parameter: impl Into<String>,
        experiment_key: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            parameter: parameter.into(),
            experiment_key: experiment_key.into(),
            wrap_with: WrapStrategy::default(),
            insertion_point: InsertionPoint::default(),
            custom_code: None,
        }
    }

    pub fn from_change(experiment_key: &str, change: &CodeChange) -> Self {
        Self {
            file: PathBuf::from(&change.file),
            function: change.function.clone(),
            parameter: change.parameter_usage.clone(),
            experiment_key: experiment_key.to_string(),
            wrap_with: change.wrap_with,
            insertion_point: change.insertion_point,
            custom_code: change.custom_code.clone(),
        }
    }

    pub fn with_insertion_point(mut self, point: InsertionPoint) -> Self {
        self.insertion_point = point;
        self
    }

    pub fn with_wrap(mut self, wrap: WrapStrategy) -> Self {
        self.wrap_with = wrap;
        self
    }
}

/// Applies code changes to files under a project root
#[derive(Debug, Clone)]
pub struct SourcePatcher {
    root: PathBuf,
    strategy: PatchStrategy,
    module_path: String,
}

impl SourcePatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            strategy: PatchStrategy::default(),
            module_path: DEFAULT_EXPERIMENT_MODULE.to_string(),
        }
    }

    pub fn with_strategy(mut self, strategy: PatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = module_path.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn strategy(&self) -> PatchStrategy {
        self.strategy
    }

    /// Absolute paths are kept, relative ones are joined to the root
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root.join(file)
        }
    }

    /// Patch one file in place
    pub fn apply(&self, request: &PatchRequest) -> Result<CodeModificationResult, PatchError> {
        let path = self.resolve(&request.file);
        if !path.is_file() {
            return Err(PatchError::FileNotFound(path));
        }
        let source = std::fs::read_to_string(&path).map_err(|source| PatchError::Io {
            path: path.clone(),
            source,
        })?;

        let rendered = self.render(&path, &source, request)?;
        std::fs::write(&path, &rendered.content).map_err(|source| PatchError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            file = %path.display(),
            function = %request.function,
            strategy = self.strategy.as_str(),
            "instrumented component"
        );
        Ok(CodeModificationResult::applied(&path, rendered.changes))
    }

    /// Build the patched text without touching the file
    pub fn render(
        &self,
        path: &Path,
        source: &str,
        request: &PatchRequest,
    ) -> Result<snippet::RenderedEdit, PatchError> {
        let marker = snippet::marker(&request.experiment_key, &request.function);
        if source.lines().any(|line| line.trim() == marker) {
            return Err(PatchError::AlreadyPatched {
                key: request.experiment_key.clone(),
                function: request.function.clone(),
                file: path.to_path_buf(),
            });
        }

        let decl = match self.locate(path, source, &request.function)? {
            Located::NotFound => {
                return Err(PatchError::TargetNotFound {
                    function: request.function.clone(),
                    file: path.to_path_buf(),
                })
            }
            Located::NoBlockBody(decl) if request.insertion_point == InsertionPoint::Before => decl,
            Located::NoBlockBody(_) => {
                return Err(PatchError::NoBlockBody {
                    function: request.function.clone(),
                    file: path.to_path_buf(),
                })
            }
            Located::Found(decl) => decl,
        };

        if request.insertion_point != InsertionPoint::Before && !decl.has_multiline_body() {
            return Err(PatchError::NoBlockBody {
                function: request.function.clone(),
                file: path.to_path_buf(),
            });
        }

        let rendered = snippet::render_edit(source, &decl, request, &self.module_path);

        if self.strategy == PatchStrategy::Syntax
            && syntax::introduces_errors(path, source, &rendered.content)?
        {
            return Err(PatchError::SyntaxRegression {
                file: path.to_path_buf(),
            });
        }

        Ok(rendered)
    }

    /// Patch one contract code change, folding any error into the result
    pub fn apply_change(&self, experiment_key: &str, change: &CodeChange) -> CodeModificationResult {
        let request = PatchRequest::from_change(experiment_key, change);
        match self.apply(&request) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("failed to patch {}: {}", change.file, e);
                CodeModificationResult::failed(self.resolve(&request.file), e.to_string())
            }
        }
    }

    /// Patch every change in order, one result per change
    pub fn apply_all(
        &self,
        experiment_key: &str,
        changes: &[CodeChange],
    ) -> Vec<CodeModificationResult> {
        changes
            .iter()
            .map(|change| self.apply_change(experiment_key, change))
            .collect()
    }

    /// Check, without writing, that `file` declares `function`.
    ///
    /// Uses the same locator as [`apply`](Self::apply), so a target found
    /// here is one the configured strategy can patch.
    pub fn detect_target(&self, file: &Path, function: &str) -> Result<(), PatchError> {
        let path = self.resolve(file);
        if !path.is_file() {
            return Err(PatchError::FileNotFound(path));
        }
        let source = std::fs::read_to_string(&path).map_err(|source| PatchError::Io {
            path: path.clone(),
            source,
        })?;
        match self.locate(&path, &source, function)? {
            Located::NotFound => Err(PatchError::TargetNotFound {
                function: function.to_string(),
                file: path,
            }),
            Located::Found(_) | Located::NoBlockBody(_) => Ok(()),
        }
    }

    fn locate(&self, path: &Path, source: &str, function: &str) -> Result<Located, PatchError> {
        Ok(match self.strategy {
            PatchStrategy::Syntax => syntax::locate(path, source, function)?,
            PatchStrategy::LineScan => locate_by_lines(source, function),
            PatchStrategy::Fast => fast::locate(source, function)
                .map(Located::Found)
                .unwrap_or_else(|| locate_by_lines(source, function)),
        })
    }
}

fn locate_by_lines(source: &str, function: &str) -> Located {
    let lines: Vec<&str> = source.split('\n').collect();
    match patterns::locate(&lines, function) {
        Some((decl, patterns::BodyScan::Block(..))) => Located::Found(decl),
        Some((decl, _)) => Located::NoBlockBody(decl),
        None => Located::NotFound,
    }
}

/// True when every result succeeded
pub fn all_applied(results: &[CodeModificationResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.success)
}
