//! Shared analyzer conformance corpus.
//!
//! Every analyzer backend must produce identical naming paths for the same
//! source. The corpus below is the contract: run `assert_conformance` against
//! any backend to prove it interchangeable.

use gql_build::{AnalyzerInput, AstAnalyzer, SwcAnalyzer};
use std::path::Path;

struct ExpectedDefinition {
    ast_path: &'static str,
    is_exported: bool,
    is_top_level: bool,
}

struct CorpusCase {
    name: &'static str,
    source: &'static str,
    expected: &'static [ExpectedDefinition],
}

const fn def(
    ast_path: &'static str,
    is_exported: bool,
    is_top_level: bool,
) -> ExpectedDefinition {
    ExpectedDefinition { ast_path, is_exported, is_top_level }
}

const CORPUS: &[CorpusCase] = &[
    CorpusCase {
        name: "top-level variables",
        source: r#"
import { gql } from "@gql/runtime";
export const f_user = gql.fragment(`fragment UserBits on User { id }`);
const q_user = gql.query(`query User { user { id } }`);
"#,
        expected: &[def("f_user", true, true), def("q_user", false, true)],
    },
    CorpusCase {
        name: "renamed export binding",
        source: r#"
import { gql } from "@gql/runtime";
const q_user = gql.query(`query User { user { id } }`);
export { q_user as userQuery };
"#,
        expected: &[def("q_user", true, true)],
    },
    CorpusCase {
        name: "object property nesting",
        source: r#"
import { gql } from "@gql/runtime";
export const models = {
  user: gql.model({ typename: "User" }),
  nested: {
    post: gql.model({ typename: "Post" }),
  },
};
"#,
        expected: &[def("models.user", true, true), def("models.nested.post", true, true)],
    },
    CorpusCase {
        name: "named arrows take the variable name",
        source: r#"
import { gql } from "@gql/runtime";
const make = () => gql.fragment(`fragment A on T { id }`);
const wrap = () => ({ q: gql.query(`query Q { ok }`) });
"#,
        expected: &[def("make", false, false), def("wrap.q", false, false)],
    },
    CorpusCase {
        name: "anonymous arrows are numbered per file",
        source: r#"
import { gql } from "@gql/runtime";
register(() => {
  const first = gql.fragment(`fragment A on T { id }`);
});
register(() => {
  const second = gql.fragment(`fragment B on T { id }`);
});
"#,
        expected: &[def("arrow#1.first", false, false), def("arrow#2.second", false, false)],
    },
    CorpusCase {
        name: "function scopes",
        source: r#"
import { gql } from "@gql/runtime";
export function helper() {
  const q = gql.query(`query Q { ok }`);
  return q;
}
"#,
        expected: &[def("helper.q", true, false)],
    },
    CorpusCase {
        name: "class methods",
        source: r#"
import { gql } from "@gql/runtime";
export class Repository {
  lookup() {
    const q = gql.query(`query Q { ok }`);
    return q;
  }
}
"#,
        expected: &[def("Repository.lookup.q", true, false)],
    },
    CorpusCase {
        name: "anonymous function and class fallbacks",
        source: r#"
import { gql } from "@gql/runtime";
register(function () {
  const q = gql.query(`query A { ok }`);
});
register(class {
  method() {
    const q = gql.query(`query B { ok }`);
  }
});
"#,
        expected: &[def("_function_1.q", false, false), def("_class_1.method.q", false, false)],
    },
    CorpusCase {
        name: "default helper import still tracks",
        source: r#"
import gql from "@gql/runtime";
export const f = gql.fragment(`fragment F on T { id }`);
"#,
        expected: &[def("f", true, true)],
    },
];

/// Runs the corpus against `analyzer`, comparing naming paths, export flags
/// and top-levelness.
fn assert_conformance(analyzer: &dyn AstAnalyzer) {
    for case in CORPUS {
        let analysis = analyzer
            .analyze(AnalyzerInput {
                file_path: Path::new("/corpus/case.ts"),
                source: case.source,
            })
            .unwrap_or_else(|err| panic!("case \"{}\" failed to analyze: {err}", case.name));

        let actual: Vec<(&str, bool, bool)> = analysis
            .definitions
            .iter()
            .map(|d| (d.ast_path.as_str(), d.is_exported, d.is_top_level))
            .collect();
        let expected: Vec<(&str, bool, bool)> = case
            .expected
            .iter()
            .map(|d| (d.ast_path, d.is_exported, d.is_top_level))
            .collect();
        assert_eq!(actual, expected, "case \"{}\" diverged", case.name);

        for definition in &analysis.definitions {
            assert_eq!(
                definition.canonical_id.as_str(),
                format!("/corpus/case.ts::{}", definition.ast_path),
                "case \"{}\" produced a mismatched canonical id",
                case.name
            );
        }
    }
}

#[test]
fn swc_backend_conforms() {
    assert_conformance(&SwcAnalyzer::default());
}

#[test]
fn corpus_paths_are_unique_per_case() {
    for case in CORPUS {
        let mut seen = std::collections::HashSet::new();
        for definition in case.expected {
            assert!(
                seen.insert(definition.ast_path),
                "case \"{}\" repeats {}",
                case.name,
                definition.ast_path
            );
        }
    }
}
