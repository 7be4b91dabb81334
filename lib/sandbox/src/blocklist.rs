//! Static analysis of script bodies before admission (§4.4).
//!
//! This is a symbol-pattern scan, not a parser: it rejects a superset of
//! what a real AST-aware analyser would catch, which is the conservative
//! direction to err in for a blocklist. Per-language tables are enumerated
//! exhaustively rather than derived, since the set of forbidden primitives
//! is a security boundary and implicit coverage is how those boundaries
//! rot.

use crate::error::SandboxError;
use forgeline_workflow::ScriptLanguage;

/// One forbidden symbol pattern and the capability it would grant.
struct ForbiddenSymbol {
    pattern: &'static str,
    capability: &'static str,
}

fn javascript_blocklist() -> &'static [ForbiddenSymbol] {
    &[
        ForbiddenSymbol { pattern: "eval(", capability: "runtime eval" },
        ForbiddenSymbol { pattern: "Function(", capability: "runtime eval" },
        ForbiddenSymbol { pattern: "import(", capability: "dynamic module import" },
        ForbiddenSymbol { pattern: "require(", capability: "dynamic module import" },
        ForbiddenSymbol { pattern: "child_process", capability: "child-process spawn" },
        ForbiddenSymbol { pattern: "process.binding", capability: "child-process spawn" },
        ForbiddenSymbol { pattern: "fs.", capability: "raw filesystem access" },
        ForbiddenSymbol { pattern: "fetch(", capability: "networking" },
        ForbiddenSymbol { pattern: "XMLHttpRequest", capability: "networking" },
        ForbiddenSymbol { pattern: "net.", capability: "networking" },
        ForbiddenSymbol { pattern: "dns.", capability: "networking" },
        ForbiddenSymbol { pattern: "process.env", capability: "environment-variable read" },
        ForbiddenSymbol { pattern: "__proto__", capability: "prototype pollution" },
        ForbiddenSymbol { pattern: "constructor.constructor", capability: "reflection to Function" },
    ]
}

fn python_blocklist() -> &'static [ForbiddenSymbol] {
    &[
        ForbiddenSymbol { pattern: "eval(", capability: "runtime eval" },
        ForbiddenSymbol { pattern: "exec(", capability: "runtime eval" },
        ForbiddenSymbol { pattern: "compile(", capability: "runtime eval" },
        ForbiddenSymbol { pattern: "__import__", capability: "dynamic module import" },
        ForbiddenSymbol { pattern: "importlib", capability: "dynamic module import" },
        ForbiddenSymbol { pattern: "subprocess", capability: "child-process spawn" },
        ForbiddenSymbol { pattern: "os.fork", capability: "child-process spawn" },
        ForbiddenSymbol { pattern: "open(", capability: "raw filesystem access" },
        ForbiddenSymbol { pattern: "socket.", capability: "networking" },
        ForbiddenSymbol { pattern: "urllib", capability: "networking" },
        ForbiddenSymbol { pattern: "requests.", capability: "networking" },
        ForbiddenSymbol { pattern: "os.environ", capability: "environment-variable read" },
        ForbiddenSymbol { pattern: "__class__.__bases__", capability: "reflection to object" },
        ForbiddenSymbol { pattern: "__globals__", capability: "reflection to object" },
    ]
}

fn blocklist_for(language: ScriptLanguage) -> &'static [ForbiddenSymbol] {
    match language {
        ScriptLanguage::JavaScript => javascript_blocklist(),
        ScriptLanguage::Python => python_blocklist(),
    }
}

/// Scans `body` against the blocklist for `language`.
///
/// # Errors
///
/// Returns [`SandboxError::BlocklistViolation`] naming the first forbidden
/// symbol found.
pub fn scan(language: ScriptLanguage, body: &str) -> Result<(), SandboxError> {
    for forbidden in blocklist_for(language) {
        if body.contains(forbidden.pattern) {
            let capability = capability_name(language, forbidden.pattern)
                .expect("pattern came from this language's own table")
                .to_string();
            return Err(SandboxError::BlocklistViolation {
                language: language_name(language).to_string(),
                symbol: forbidden.pattern.to_string(),
                capability,
            });
        }
    }
    Ok(())
}

fn language_name(language: ScriptLanguage) -> &'static str {
    match language {
        ScriptLanguage::JavaScript => "javascript",
        ScriptLanguage::Python => "python",
    }
}

/// Returns the capability a given forbidden pattern would grant, for
/// surfacing in admission-rejection messages.
#[must_use]
pub fn capability_name(language: ScriptLanguage, pattern: &str) -> Option<&'static str> {
    blocklist_for(language)
        .iter()
        .find(|f| f.pattern == pattern)
        .map(|f| f.capability)
}
