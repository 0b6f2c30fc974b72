use super::{ExecType, Instruction, Operand, DATATYPE_PREFIX};
use crate::federation::IdSequence;
use crate::protocol::FederatedRequest;

/// Rewrite `inst` into a request workers can execute.
///
/// The output is renamed to a fresh id, which also becomes the request id,
/// and every input is renamed to the id its data is stored under on the
/// workers (usually the federation map id). Only the name of an exactly
/// matching operand field, or an exactly matching `key=value` parameter, is
/// substituted. Spark instructions are retagged as CP.
pub fn call_instruction(
    inst: &Instruction,
    output: &Operand,
    inputs: &[(&Operand, i64)],
    ids: &IdSequence,
    tid: u64,
) -> FederatedRequest {
    let id = ids.next_id();
    let output_id = id.to_string();
    let renames: Vec<(&str, String)> = std::iter::once((output.name.as_str(), output_id))
        .chain(inputs.iter().map(|(op, var_id)| (op.name.as_str(), var_id.to_string())))
        .collect();

    let fields = inst
        .fields()
        .iter()
        .map(|field| {
            renames
                .iter()
                .find_map(|(old, new)| rename_field(field, old, new))
                .unwrap_or_else(|| field.clone())
        })
        .collect();

    let exec_type = match inst.exec_type() {
        ExecType::Spark => ExecType::Cp,
        other => other,
    };
    let rewritten = inst.clone().with_exec_type(exec_type).with_fields(fields);
    FederatedRequest::exec_inst(id, rewritten.to_string()).with_tid(tid)
}

fn rename_field(field: &str, old: &str, new: &str) -> Option<String> {
    if let Some((key, value)) = field.split_once('=') {
        if value == old && Operand::parse(field).is_none() {
            return Some(format!("{}={}", key, new));
        }
    }
    let rest = field.strip_prefix(old)?;
    if rest.starts_with(DATATYPE_PREFIX) {
        Some(format!("{}{}", new, rest))
    } else {
        None
    }
}
