//! Up-front validation of provider specifications.
//!
//! Every selector and regex is compiled before any network work starts, so a
//! broken specification fails its own provider and nothing else.

use regex::Regex;

use docassembler_shared::{
    ContentRule, DocAssemblerError, DocumentRule, ProviderSpec, Result, SourceKind,
};

use crate::selector::{JsonPath, PathExpr};

/// Check a specification; the first problem is returned as a Spec error.
pub fn validate_spec(spec: &ProviderSpec) -> Result<()> {
    let provider = &spec.provider;
    if provider.name.trim().is_empty() {
        return Err(DocAssemblerError::spec("provider name is empty"));
    }
    if provider.bundles.is_empty() {
        return Err(DocAssemblerError::spec(format!(
            "provider `{}` declares no bundles",
            provider.name
        )));
    }

    for bundle in &provider.bundles {
        let context = |msg: String| {
            DocAssemblerError::spec(format!("bundle `{}`: {msg}", bundle.name))
        };

        provider.bundle_url(bundle)?;

        if let Some(expr) = &bundle.sub_index_xpath {
            check_selector(bundle.format, expr).map_err(|e| context(e.to_string()))?;
        }
        if bundle.documents.is_empty() {
            return Err(context("no document rules".into()));
        }

        for (i, document) in bundle.documents.iter().enumerate() {
            validate_document(bundle.format, document)
                .map_err(|e| context(format!("document rule {}: {e}", i + 1)))?;
        }
    }

    tracing::debug!(provider = %provider.name, "specification validated");
    Ok(())
}

fn validate_document(index_format: SourceKind, document: &DocumentRule) -> Result<()> {
    match index_format {
        SourceKind::Html => {
            let expr = document
                .url_xpath
                .as_deref()
                .ok_or_else(|| DocAssemblerError::spec("missing urlXPath"))?;
            PathExpr::parse(expr)?;
            if let Some(expr) = &document.index_title_xpath {
                PathExpr::parse(expr)?;
            }
        }
        SourceKind::Json => {
            let expr = document
                .url_json_path
                .as_deref()
                .ok_or_else(|| DocAssemblerError::spec("missing urlJsonPath"))?;
            JsonPath::parse(expr)?;
            if let Some(expr) = &document.title_json_path {
                JsonPath::parse(expr)?;
            }
            if let Some(pattern) = &document.url_reg_exp {
                compile_regex(pattern)?;
            }
        }
    }

    if let Some(pattern) = &document.synonym_reg_exp {
        let re = compile_regex(pattern)?;
        let names: Vec<_> = re.capture_names().flatten().collect();
        for group in ["title", "synonym"] {
            if !names.contains(&group) {
                return Err(DocAssemblerError::spec(format!(
                    "synonymRegExp `{pattern}` has no `{group}` group"
                )));
            }
        }
    }

    validate_rules(document.format, &document.rules)
}

fn validate_rules(format: SourceKind, rules: &[ContentRule]) -> Result<()> {
    for rule in rules {
        match rule {
            ContentRule::Title { select }
            | ContentRule::Image { select, .. }
            | ContentRule::Synonym { select }
            | ContentRule::Content { select, .. } => check_selector(format, select)?,
            ContentRule::Node { select, rules } => {
                check_selector(format, select)?;
                validate_rules(format, rules)?;
            }
            ContentRule::Unknown => {}
        }
    }
    Ok(())
}

fn check_selector(format: SourceKind, expr: &str) -> Result<()> {
    match format {
        SourceKind::Html => PathExpr::parse(expr).map(drop),
        SourceKind::Json => JsonPath::parse(expr).map(drop),
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| DocAssemblerError::spec(format!("invalid regex `{pattern}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[provider]
name = "P"
url = "https://p.test/"

[[provider.bundle]]
name = "B"
url = "index"
subIndexXPath = "//nav//a"

[[provider.bundle.document]]
urlXPath = "//a[@class='doc']"
synonymRegExp = '(?<title>.+) \((?<synonym>.+)\)'

[[provider.bundle.document.rule]]
kind = "Content"
nodeXPath = "//main"
"#;

    #[test]
    fn accepts_valid_spec() {
        let spec = ProviderSpec::from_toml_str(VALID).unwrap();
        validate_spec(&spec).unwrap();
    }

    #[test]
    fn rejects_bad_selector() {
        let spec =
            ProviderSpec::from_toml_str(&VALID.replace("//main", "//main[")).unwrap();
        let err = validate_spec(&spec).unwrap_err();
        assert!(matches!(err, DocAssemblerError::Spec { .. }));
        assert!(err.to_string().contains("bundle `B`"));
    }

    #[test]
    fn rejects_synonym_regex_without_groups() {
        let spec = ProviderSpec::from_toml_str(
            &VALID.replace(r"(?<title>.+) \((?<synonym>.+)\)", r"(.+) \((.+)\)"),
        )
        .unwrap();
        let err = validate_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn json_index_requires_json_path() {
        let spec = ProviderSpec::from_json_str(
            r#"{"provider": {"name": "P", "url": "https://p.test/",
                "bundle": [{"name": "B", "url": "i.json", "format": "json",
                            "document": [{"urlXPath": "//a"}]}]}}"#,
        )
        .unwrap();
        let err = validate_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("urlJsonPath"));
    }

    #[test]
    fn rejects_empty_provider() {
        let spec = ProviderSpec::from_toml_str(
            "[provider]\nname = \"P\"\nurl = \"https://p.test/\"\n",
        )
        .unwrap();
        assert!(validate_spec(&spec).is_err());
    }
}
