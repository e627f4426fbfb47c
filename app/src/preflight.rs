//! Preflight gate: document validation, activation gating, required secrets.

use {
    crate::workorder::{StepDoc, WorkOrderDoc},
    ordo_catalog::{ModuleKind, ModuleRegistry, SecretStore},
    ordo_shared::error::{Error, ValidationError},
    std::collections::HashSet,
};

/// Outcome of the validation pass. On an enabled workorder `errors` block
/// execution; on a disabled workorder the same findings are demoted to
/// `warnings`.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub errors: Vec<Error>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn blocks_execution(&self) -> bool {
        !self.errors.is_empty()
    }

    fn push(&mut self, enabled: bool, finding: Error) {
        if enabled {
            self.errors.push(finding);
        } else {
            self.warnings.push(finding.to_string());
        }
    }
}

/// Validate document shape, step kinds, and packaging/delivery activation
/// gating over the enabled steps.
pub fn validate_workorder(doc: &WorkOrderDoc, registry: &ModuleRegistry) -> PreflightReport {
    let mut report = PreflightReport::default();
    let enabled = doc.enabled;

    let mut seen_ids = HashSet::new();
    for step in &doc.steps {
        if !seen_ids.insert(step.step_id.as_str()) {
            report.push(
                enabled,
                ValidationError::DuplicateStepId(step.step_id.clone()).into(),
            );
        }
    }

    let mut packaging_positions = Vec::new();
    let mut delivery_positions = Vec::new();
    for (position, step) in doc.enabled_steps().into_iter().enumerate() {
        match step_kind(step, registry) {
            Ok(kind) => {
                match kind {
                    ModuleKind::Packaging => packaging_positions.push(position),
                    ModuleKind::Delivery => delivery_positions.push(position),
                    ModuleKind::Acquisition | ModuleKind::Transform => {}
                }
            }
            Err(finding) => report.push(enabled, finding),
        }
    }

    let has_packaging = !packaging_positions.is_empty();
    let has_delivery = !delivery_positions.is_empty();

    if doc.artifacts_requested && !has_packaging {
        report.push(enabled, ValidationError::MissingPackaging.into());
    }
    if (doc.artifacts_requested || has_packaging) && !has_delivery {
        report.push(enabled, ValidationError::MissingDelivery.into());
    }
    if has_packaging
        && has_delivery
        && delivery_positions.iter().max() < packaging_positions.iter().min()
    {
        report.push(enabled, ValidationError::DeliveryBeforePackaging.into());
    }

    report
}

/// Resolve a step's declared kind and require it to match the module
/// contract.
fn step_kind(step: &StepDoc, registry: &ModuleRegistry) -> Result<ModuleKind, Error> {
    let declared = step
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ValidationError::MissingStepKind {
            step_id: step.step_id.clone(),
        })?;
    let contract = registry.contract(&step.module_id)?;
    let declared_kind = ModuleKind::parse(declared).map_err(|_| {
        Error::from(ValidationError::KindMismatch {
            step_id: step.step_id.clone(),
            module_id: step.module_id.clone(),
            declared: declared.to_owned(),
            actual: contract.kind.to_string(),
        })
    })?;
    if declared_kind != contract.kind {
        return Err(ValidationError::KindMismatch {
            step_id: step.step_id.clone(),
            module_id: step.module_id.clone(),
            declared: declared.to_owned(),
            actual: contract.kind.to_string(),
        }
        .into());
    }
    Ok(contract.kind)
}

/// A required secret that did not resolve to a populated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSecret {
    pub step_id: String,
    pub module_id: String,
    pub secret_key: String,
}

/// Check every enabled step's required secrets against the store.
pub fn check_required_secrets(
    steps: &[&StepDoc],
    registry: &ModuleRegistry,
    secrets: &SecretStore,
) -> Result<(), Vec<MissingSecret>> {
    let mut missing = Vec::new();
    for step in steps {
        let Ok(contract) = registry.contract(&step.module_id) else {
            continue;
        };
        for key in secrets.missing_keys(&contract.module_id, &contract.requirements.secrets) {
            missing.push(MissingSecret {
                step_id: step.step_id.clone(),
                module_id: contract.module_id.clone(),
                secret_key: key,
            });
        }
    }
    if missing.is_empty() { Ok(()) } else { Err(missing) }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::workorder::WorkOrderDoc, std::fs, tempfile::TempDir};

    fn registry() -> (TempDir, ModuleRegistry) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("modules_index.csv"),
            "module_id,path,kind,version,supports_downloadable_artifacts,depends_on_module_ids\n\
             search,modules/search,acquisition,1.0.0,false,[]\n\
             package_std,modules/package_std,packaging,1.0.0,true,[]\n\
             deliver_mail,modules/deliver_mail,delivery,1.0.0,false,[]\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("module_requirements_index.csv"),
            "module_id,requirement_type,requirement_key\n\
             deliver_mail,secret,MAIL_TOKEN\n",
        )
        .unwrap();
        let registry = ModuleRegistry::load(dir.path()).unwrap();
        (dir, registry)
    }

    fn doc(yaml: &str) -> WorkOrderDoc {
        WorkOrderDoc::parse(yaml).unwrap()
    }

    #[test]
    fn enabled_packaging_without_delivery_is_an_error() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nsteps:\n  - {step_id: p1, module_id: package_std, kind: packaging}\n",
            ),
            &registry,
        );
        assert!(report.blocks_execution());
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::MissingDelivery)
        )));
    }

    #[test]
    fn disabled_workorder_demotes_to_warnings() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: false\nartifacts_requested: true\nsteps:\n  - {step_id: d1, module_id: deliver_mail, kind: delivery}\n",
            ),
            &registry,
        );
        assert!(!report.blocks_execution());
        assert!(report.warnings.iter().any(|w| w.contains("missing packaging step")));
    }

    #[test]
    fn artifacts_requested_requires_both_stages() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nartifacts_requested: true\nsteps:\n  - {step_id: p1, module_id: package_std, kind: packaging}\n",
            ),
            &registry,
        );
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::MissingDelivery)
        )));

        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nartifacts_requested: true\nsteps:\n  - {step_id: d1, module_id: deliver_mail, kind: delivery}\n",
            ),
            &registry,
        );
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::MissingPackaging)
        )));
    }

    #[test]
    fn delivery_before_packaging_is_wrong_order() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nartifacts_requested: true\nsteps:\n  - {step_id: d1, module_id: deliver_mail, kind: delivery}\n  - {step_id: p1, module_id: package_std, kind: packaging}\n",
            ),
            &registry,
        );
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::DeliveryBeforePackaging)
        )));
    }

    #[test]
    fn missing_kind_blocks_enabled_and_warns_disabled() {
        let (_dir, registry) = registry();
        let enabled = validate_workorder(
            &doc("work_order_id: wo1\nenabled: true\nsteps:\n  - {step_id: s1, module_id: search}\n"),
            &registry,
        );
        assert!(enabled.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::MissingStepKind { .. })
        )));

        let disabled = validate_workorder(
            &doc("work_order_id: wo1\nenabled: false\nsteps:\n  - {step_id: s1, module_id: search}\n"),
            &registry,
        );
        assert!(!disabled.blocks_execution());
        assert!(disabled.warnings.iter().any(|w| w.contains("missing required field 'kind'")));
    }

    #[test]
    fn kind_must_match_module_contract() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nsteps:\n  - {step_id: s1, module_id: search, kind: delivery}\n  - {step_id: d1, module_id: deliver_mail, kind: delivery}\n",
            ),
            &registry,
        );
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::KindMismatch { .. })
        )));
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let (_dir, registry) = registry();
        let report = validate_workorder(
            &doc(
                "work_order_id: wo1\nenabled: true\nsteps:\n  - {step_id: s1, module_id: search, kind: acquisition}\n  - {step_id: s1, module_id: search, kind: acquisition}\n",
            ),
            &registry,
        );
        assert!(report.errors.iter().any(|e| matches!(
            e,
            Error::Validation(ValidationError::DuplicateStepId(_))
        )));
    }

    #[test]
    fn missing_secret_is_reported_per_step() {
        let (_dir, registry) = registry();
        let store: SecretStore = Default::default();
        let doc = doc(
            "work_order_id: wo1\nsteps:\n  - {step_id: d1, module_id: deliver_mail, kind: delivery}\n",
        );
        let steps = doc.enabled_steps();
        let missing = check_required_secrets(&steps, &registry, &store).unwrap_err();
        assert_eq!(
            missing,
            vec![MissingSecret {
                step_id: "d1".into(),
                module_id: "deliver_mail".into(),
                secret_key: "MAIL_TOKEN".into(),
            }]
        );
    }
}
