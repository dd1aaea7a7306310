use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::AdtErr;
use crate::xml::escape;

pub const ADTCORE_NAMESPACE: &str = "http://www.sap.com/adt/core";
pub const DEFAULT_SOURCE_SUFFIX: &str = "/source/main";
const DEFAULT_MAX_NAME_LEN: usize = 30;

/// How one object type is addressed, searched and created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeSpec {
    /// Type code such as `PROG/P`. Filled from the table key when the entry
    /// comes from `[object_types.<code>]`.
    #[serde(default)]
    pub code: String,

    /// Collection path the object URLs hang off, e.g.
    /// `/sap/bc/adt/programs/programs`.
    pub collection: String,

    /// `Content-Type` of the creation envelope.
    pub content_type: String,

    /// Qualified root element of the creation envelope, e.g.
    /// `program:abapProgram`.
    pub root_element: String,

    /// Namespace bound to the root element's prefix.
    pub namespace: String,

    /// `objectType` filter for the repository quick search. Defaults to the
    /// type code.
    #[serde(default)]
    pub search_type: Option<String>,

    /// Extra attributes written on the root element verbatim.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default = "default_source_suffix")]
    pub source_suffix: String,

    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

fn default_source_suffix() -> String {
    DEFAULT_SOURCE_SUFFIX.to_string()
}

fn default_max_name_len() -> usize {
    DEFAULT_MAX_NAME_LEN
}

/// Object addressing derived from `(type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectReference {
    pub object_type: String,
    pub name: String,
    pub object_url: String,
    pub source_url: String,
}

/// Values substituted into a creation envelope.
#[derive(Debug, Clone)]
pub struct CreationParams<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub package: &'a str,
    pub responsible: Option<&'a str>,
    pub master_language: Option<&'a str>,
}

impl ObjectTypeSpec {
    pub fn search_type(&self) -> &str {
        self.search_type.as_deref().unwrap_or(&self.code)
    }

    /// URL of the object named `name`. The name is lowercased and
    /// percent-encoded, so `/NS/ZFOO` becomes `%2Fns%2Fzfoo`.
    pub fn object_url(&self, name: &str) -> String {
        let collection = self.collection.trim_end_matches('/');
        let encoded = urlencoding::encode(&name.to_lowercase()).into_owned();
        format!("{collection}/{encoded}")
    }

    pub fn validate_name(&self, name: &str) -> Result<(), AdtErr> {
        let invalid = |reason: String| AdtErr::InvalidObjectName {
            name: name.to_string(),
            reason,
        };
        if name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if name.chars().count() > self.max_name_len {
            return Err(invalid(format!(
                "{} names are at most {} characters",
                self.code, self.max_name_len
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '$')))
        {
            return Err(invalid(format!("character {bad:?} is not allowed")));
        }
        Ok(())
    }

    /// Renders the creation envelope. The name keeps the caller's casing.
    pub fn render_creation(&self, params: &CreationParams<'_>) -> String {
        let (prefix, _) = self
            .root_element
            .split_once(':')
            .unwrap_or(("", self.root_element.as_str()));
        let namespace_decl = if prefix.is_empty() {
            format!(r#"xmlns="{}""#, escape(&self.namespace))
        } else {
            format!(r#"xmlns:{prefix}="{}""#, escape(&self.namespace))
        };

        let mut attributes = vec![
            namespace_decl,
            format!(r#"xmlns:adtcore="{ADTCORE_NAMESPACE}""#),
            format!(r#"adtcore:description="{}""#, escape(params.description)),
            format!(r#"adtcore:name="{}""#, escape(params.name)),
            format!(r#"adtcore:type="{}""#, escape(&self.code)),
        ];
        if let Some(language) = params.master_language {
            attributes.push(format!(r#"adtcore:masterLanguage="{}""#, escape(language)));
        }
        if let Some(responsible) = params.responsible {
            attributes.push(format!(r#"adtcore:responsible="{}""#, escape(responsible)));
        }
        for (key, value) in &self.attributes {
            attributes.push(format!(r#"{key}="{}""#, escape(value)));
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{root} {attrs}>\n  <adtcore:packageRef adtcore:name=\"{package}\"/>\n</{root}>\n",
            root = self.root_element,
            attrs = attributes.join(" "),
            package = escape(params.package),
        )
    }
}

struct BuiltinType {
    code: &'static str,
    collection: &'static str,
    content_type: &'static str,
    root_element: &'static str,
    namespace: &'static str,
    attributes: &'static [(&'static str, &'static str)],
    max_name_len: usize,
}

const BUILTIN_TYPES: &[BuiltinType] = &[
    BuiltinType {
        code: "PROG/P",
        collection: "/sap/bc/adt/programs/programs",
        content_type: "application/vnd.sap.adt.programs.programs.v2+xml",
        root_element: "program:abapProgram",
        namespace: "http://www.sap.com/adt/programs/programs",
        attributes: &[],
        max_name_len: 40,
    },
    BuiltinType {
        code: "PROG/I",
        collection: "/sap/bc/adt/programs/includes",
        content_type: "application/vnd.sap.adt.programs.includes.v2+xml",
        root_element: "include:abapInclude",
        namespace: "http://www.sap.com/adt/programs/includes",
        attributes: &[],
        max_name_len: 40,
    },
    BuiltinType {
        code: "CLAS/OC",
        collection: "/sap/bc/adt/oo/classes",
        content_type: "application/vnd.sap.adt.oo.classes.v4+xml",
        root_element: "class:abapClass",
        namespace: "http://www.sap.com/adt/oo/classes",
        attributes: &[("class:final", "true"), ("class:visibility", "public")],
        max_name_len: 30,
    },
    BuiltinType {
        code: "INTF/OI",
        collection: "/sap/bc/adt/oo/interfaces",
        content_type: "application/vnd.sap.adt.oo.interfaces.v5+xml",
        root_element: "intf:abapInterface",
        namespace: "http://www.sap.com/adt/oo/interfaces",
        attributes: &[],
        max_name_len: 30,
    },
    BuiltinType {
        code: "FUGR/F",
        collection: "/sap/bc/adt/functions/groups",
        content_type: "application/vnd.sap.adt.functions.groups.v3+xml",
        root_element: "group:abapFunctionGroup",
        namespace: "http://www.sap.com/adt/functions/groups",
        attributes: &[],
        max_name_len: 26,
    },
    BuiltinType {
        code: "DDLS/DF",
        collection: "/sap/bc/adt/ddic/ddl/sources",
        content_type: "application/vnd.sap.adt.ddlsource+xml",
        root_element: "ddl:ddlSource",
        namespace: "http://www.sap.com/adt/ddic/ddlsources",
        attributes: &[],
        max_name_len: 30,
    },
    BuiltinType {
        code: "TABL/DT",
        collection: "/sap/bc/adt/ddic/tables",
        content_type: "application/vnd.sap.adt.tables.v2+xml",
        root_element: "blue:blueSource",
        namespace: "http://www.sap.com/wbobj/blue",
        attributes: &[],
        max_name_len: 16,
    },
    BuiltinType {
        code: "DCLS/DL",
        collection: "/sap/bc/adt/acm/dcl/sources",
        content_type: "application/vnd.sap.adt.dclsource+xml",
        root_element: "dcl:dclSource",
        namespace: "http://www.sap.com/adt/acm/dclsources",
        attributes: &[],
        max_name_len: 30,
    },
];

impl From<&BuiltinType> for ObjectTypeSpec {
    fn from(builtin: &BuiltinType) -> Self {
        Self {
            code: builtin.code.to_string(),
            collection: builtin.collection.to_string(),
            content_type: builtin.content_type.to_string(),
            root_element: builtin.root_element.to_string(),
            namespace: builtin.namespace.to_string(),
            search_type: None,
            attributes: builtin
                .attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            source_suffix: default_source_suffix(),
            max_name_len: builtin.max_name_len,
        }
    }
}

/// Immutable table of every object type the lifecycle can handle, keyed by
/// upper-cased type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCatalog {
    types: BTreeMap<String, ObjectTypeSpec>,
}

impl Default for ObjectCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ObjectCatalog {
    pub fn builtin() -> Self {
        let types = BUILTIN_TYPES
            .iter()
            .map(|builtin| (builtin.code.to_string(), ObjectTypeSpec::from(builtin)))
            .collect();
        Self { types }
    }

    /// Adds or replaces entries. Keys are type codes; an entry's `code` is
    /// taken from its key.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ObjectTypeSpec>) -> Self {
        for (code, spec) in overrides {
            let code = code.to_ascii_uppercase();
            let mut spec = spec.clone();
            spec.code.clone_from(&code);
            self.types.insert(code, spec);
        }
        self
    }

    pub fn get(&self, object_type: &str) -> Option<&ObjectTypeSpec> {
        self.types.get(&object_type.trim().to_ascii_uppercase())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Derives the object and default source URL. `None` for unknown types.
    pub fn resolve(&self, object_type: &str, name: &str) -> Option<ObjectReference> {
        let spec = self.get(object_type)?;
        let object_url = spec.object_url(name);
        let source_url = format!("{object_url}{}", spec.source_suffix);
        Some(ObjectReference {
            object_type: spec.code.clone(),
            name: name.to_string(),
            object_url,
            source_url,
        })
    }

    /// Like [`ObjectCatalog::resolve`], mapping failures to errors and
    /// validating the name.
    pub fn require(
        &self,
        object_type: &str,
        name: &str,
    ) -> Result<(&ObjectTypeSpec, ObjectReference), AdtErr> {
        let spec = self
            .get(object_type)
            .ok_or_else(|| AdtErr::UnsupportedObjectType(object_type.to_string()))?;
        spec.validate_name(name)?;
        let reference = self
            .resolve(object_type, name)
            .ok_or_else(|| AdtErr::UnsupportedObjectType(object_type.to_string()))?;
        Ok((spec, reference))
    }
}
