//! Shared test documents and helpers for integration tests.

#![allow(dead_code)]

/// Numeric-style document with one reference list at the end.
///
/// Reference 3 is defined but never cited; [7] is cited but never defined.
pub const NUMERIC_DOC: &str = "# Heart failure

Heart failure affects millions [1]. Outcomes improved [2]. See also [7].

## References

1. Heart failure statistics. https://www.cdc.gov/heart/stats
2. [Outcome trial](https://doi.org/10.1000/trial). Smith J, Doe A. Circulation. 2019.
3. Unused guideline. https://example.org/guide
";

/// Two chapters, each numbering its references from 1.
pub const MULTI_DOC: &str = "# Chapter one

Alpha [1] and beta [2].

## References

1. Alpha source. https://a.example.org
2. Beta source. https://b.example.org

# Chapter two

Gamma [1] and delta [2].

## References

1. Gamma source. https://c.example.org
2. Delta source. https://d.example.org
";

/// Label file content for `NUMERIC_DOC`.
pub const NUMERIC_LABELS: &str = r#"{"1": "[^CDC-2023]", "2": "[^Smith-2019]", "3": "[^Guide-2021]"}"#;

/// Builds a JSON label object from `(number, label)` pairs.
pub fn build_labels(entries: &[(u32, &str)]) -> String {
    let fields: Vec<String> = entries
        .iter()
        .map(|(number, label)| format!(r#""{}": "{}""#, number, label))
        .collect();
    format!("{{{}}}", fields.join(", "))
}
