use adt_backend_client::AdtRequest;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::decoders::AtcFinding;
use crate::decoders::CheckMessage;
use crate::decoders::parse_atc_findings;
use crate::decoders::parse_check_messages;
use crate::decoders::parse_worklist_id;
use crate::error::Result;
use crate::lifecycle::ObjectLifecycle;
use crate::object_types::ADTCORE_NAMESPACE;
use crate::object_types::ObjectReference;
use crate::xml::escape;

pub const CHECK_RUNS_PATH: &str = "/sap/bc/adt/checkruns";
pub const ATC_WORKLISTS_PATH: &str = "/sap/bc/adt/atc/worklists";
pub const ATC_RUNS_PATH: &str = "/sap/bc/adt/atc/runs";
pub const DEFAULT_ATC_VARIANT: &str = "DEFAULT";

const CHECKRUN_NAMESPACE: &str = "http://www.sap.com/adt/checkrun";
const ATC_NAMESPACE: &str = "http://www.sap.com/adt/atc";
const ATC_MAX_VERDICTS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtcReport {
    pub worklist_id: String,
    pub findings: Vec<AtcFinding>,
}

/// Check-run request for one object. With `content`, the unsaved source is
/// checked as the inactive version; otherwise the stored active version.
fn render_check_objects(reference: &ObjectReference, content: Option<&str>) -> String {
    let version = if content.is_some() { "inactive" } else { "active" };
    let artifacts = match content {
        Some(content) => format!(
            "\n    <chkrun:artifacts>\n      <chkrun:artifact chkrun:contentType=\"text/plain; charset=utf-8\" chkrun:uri=\"{uri}\">\n        <chkrun:content>{encoded}</chkrun:content>\n      </chkrun:artifact>\n    </chkrun:artifacts>\n  ",
            uri = escape(&reference.source_url),
            encoded = BASE64_STANDARD.encode(content.as_bytes()),
        ),
        None => String::new(),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<chkrun:checkObjectList xmlns:chkrun=\"{CHECKRUN_NAMESPACE}\" xmlns:adtcore=\"{ADTCORE_NAMESPACE}\">\n  <chkrun:checkObject adtcore:uri=\"{uri}\" chkrun:version=\"{version}\">{artifacts}</chkrun:checkObject>\n</chkrun:checkObjectList>\n",
        uri = escape(&reference.object_url),
    )
}

fn render_atc_run(reference: &ObjectReference) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<atc:run maximumVerdicts=\"{ATC_MAX_VERDICTS}\" xmlns:atc=\"{ATC_NAMESPACE}\">\n  <objectSets xmlns:adtcore=\"{ADTCORE_NAMESPACE}\">\n    <objectSet kind=\"inclusive\">\n      <adtcore:objectReferences>\n        <adtcore:objectReference adtcore:uri=\"{uri}\"/>\n      </adtcore:objectReferences>\n    </objectSet>\n  </objectSets>\n</atc:run>\n",
        uri = escape(&reference.object_url),
    )
}

impl ObjectLifecycle<'_> {
    /// Syntax check of an object. `source` checks that text instead of the
    /// stored version.
    pub async fn check_syntax(
        &mut self,
        object_type: &str,
        name: &str,
        source: Option<&str>,
    ) -> Result<Vec<CheckMessage>> {
        let (_, reference) = self.catalog().require(object_type, name)?;
        let request = AdtRequest::post(CHECK_RUNS_PATH)
            .query("reporters", "abapCheckRun")
            .content_type("application/vnd.sap.adt.checkobjects+xml")
            .accept("application/vnd.sap.adt.checkmessages+xml")
            .body(render_check_objects(&reference, source));
        let response = self.session().send(request).await?;
        let messages = parse_check_messages(&response.body);
        debug!("syntax check of {name}: {} message(s)", messages.len());
        Ok(messages)
    }

    /// Runs the ATC check variant `variant` on one object.
    pub async fn run_atc(
        &mut self,
        object_type: &str,
        name: &str,
        variant: &str,
    ) -> Result<AtcReport> {
        let (_, reference) = self.catalog().require(object_type, name)?;

        let worklist = AdtRequest::post(ATC_WORKLISTS_PATH)
            .query("checkVariant", variant)
            .accept("text/plain");
        let response = self.session().send(worklist).await?;
        let worklist_id = parse_worklist_id(&response.body)?;

        let run = AdtRequest::post(ATC_RUNS_PATH)
            .query("worklistId", worklist_id.clone())
            .content_type("application/xml")
            .accept("application/xml")
            .body(render_atc_run(&reference));
        self.session().send(run).await?;

        let results = AdtRequest::get(format!("{ATC_WORKLISTS_PATH}/{worklist_id}"))
            .query("includeExemptedFindings", "false")
            .accept("application/atc.worklist.v1+xml");
        let response = self.session().send(results).await?;
        let findings = parse_atc_findings(&response.body);
        info!(
            "ATC {variant} on {name}: {} finding(s) in worklist {worklist_id}",
            findings.len()
        );
        Ok(AtcReport {
            worklist_id,
            findings,
        })
    }
}
