//! Run diagnostics and their SARIF rendering.

use serde_json::json;
use serde_sarif::sarif::{
    Invocation, Location, LogicalLocation, Message, MultiformatMessageString, ReportingDescriptor,
    Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::ir::MemberRef;

/// Kind of condition reported to the operator. None of them stop the run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Rule {
    SuspiciousRename,
    UnresolvedReference,
    UnsupportedShape,
}

impl Rule {
    pub(crate) const ALL: [Rule; 3] = [
        Rule::SuspiciousRename,
        Rule::UnresolvedReference,
        Rule::UnsupportedShape,
    ];

    pub(crate) fn id(self) -> &'static str {
        match self {
            Rule::SuspiciousRename => "SUSPICIOUS_RENAME",
            Rule::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Rule::UnsupportedShape => "UNSUPPORTED_SHAPE",
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Rule::SuspiciousRename => "Suspicious rename",
            Rule::UnresolvedReference => "Unresolved reference",
            Rule::UnsupportedShape => "Unsupported shape",
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            Rule::SuspiciousRename => "A name that does not look obfuscated was renamed",
            Rule::UnresolvedReference => {
                "A referenced class or member was not found in any library or the runtime"
            }
            Rule::UnsupportedShape => "A method body was skipped because it uses an unmodelled construct",
        }
    }
}

/// Class or member a diagnostic refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Subject {
    Class(String),
    Member(MemberRef),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Diagnostic {
    pub(crate) rule: Rule,
    pub(crate) message: String,
    pub(crate) subject: Subject,
}

impl Diagnostic {
    pub(crate) fn class(rule: Rule, class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            subject: Subject::Class(class.into()),
        }
    }

    pub(crate) fn member(rule: Rule, member: MemberRef, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            subject: Subject::Member(member),
        }
    }

    fn to_sarif(&self) -> SarifResult {
        let location = match &self.subject {
            Subject::Class(name) => class_location(name),
            Subject::Member(member) => member_location(member),
        };
        SarifResult::builder()
            .rule_id(self.rule.id())
            .message(result_message(self.message.clone()))
            .locations(vec![location])
            .build()
    }
}

/// Diagnostics collected over one run. Each one is logged as it arrives.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(rule = diagnostic.rule.id(), "{}", diagnostic.message);
        self.items.push(diagnostic);
    }

    pub(crate) fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn count(&self, rule: Rule) -> usize {
        self.items.iter().filter(|item| item.rule == rule).count()
    }
}

pub(crate) fn member_location(member: &MemberRef) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{}.{}{}", member.owner, member.name, member.desc))
        .kind(if member.desc.starts_with('(') {
            "function"
        } else {
            "member"
        })
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn class_location(class_name: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

pub(crate) fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn rule_descriptors() -> Vec<ReportingDescriptor> {
    Rule::ALL
        .iter()
        .map(|rule| {
            ReportingDescriptor::builder()
                .id(rule.id())
                .name(rule.name())
                .short_description(
                    MultiformatMessageString::builder()
                        .text(rule.description())
                        .build(),
                )
                .build()
        })
        .collect()
}

pub(crate) fn build_sarif(diagnostics: &Diagnostics, invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder()
        .name("classdeob")
        .rules(rule_descriptors())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let results: Vec<SarifResult> = diagnostics.iter().map(Diagnostic::to_sarif).collect();
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
