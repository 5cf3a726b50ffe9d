//! Disassembler for compiled units.
//!
//! One line per instruction: ip, mnemonic, decoded operands. The decoder
//! here is the authority on operand widths; the VM's inline decode and the
//! builder's emitters must agree with it (see the round-trip tests in
//! `ottava_vm/tests`).

use crate::opcode::Op;
use crate::unit::{BytecodeUnit, Const};
use std::fmt::Write;

/// Render a whole unit: header, pools, and code listing.
pub fn disassemble(unit: &BytecodeUnit) -> String {
    let mut out = String::new();
    let hdr = unit.header();

    writeln!(out, "unit: {}", unit.name()).unwrap();
    writeln!(
        out,
        "  returns: {}  args: {}  locals: {}",
        hdr.n_returns, hdr.n_args, hdr.n_locals
    )
    .unwrap();

    if !unit.constants.is_empty() {
        writeln!(out, "constants:").unwrap();
        for (i, c) in unit.constants.iter().enumerate() {
            match c {
                Const::Num(v) => writeln!(out, "  {i:4}: {v}").unwrap(),
                Const::Bool(v) => writeln!(out, "  {i:4}: {v}").unwrap(),
                Const::Str(s) => writeln!(out, "  {i:4}: \"{s}\"").unwrap(),
                Const::Colon => writeln!(out, "  {i:4}: :").unwrap(),
                Const::Unit(u) => writeln!(out, "  {i:4}: <unit {}>", u.name()).unwrap(),
            }
        }
    }
    if !unit.ids.is_empty() {
        writeln!(out, "ids:").unwrap();
        for (i, id) in unit.ids.iter().enumerate() {
            writeln!(out, "  {i:4}: {id}").unwrap();
        }
    }

    writeln!(out, "code:").unwrap();
    let mut ip = unit.entry_ip();
    while ip < unit.code_len() {
        let line = match disassemble_at(unit, ip) {
            Some((text, next)) => {
                let line = format!("  {ip:5}: {text}");
                ip = next;
                line
            }
            None => {
                let byte = unit.u8_at(ip);
                let line = format!("  {ip:5}: <bad opcode {byte:#04x}>");
                ip += 1;
                line
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Decode the instruction at `ip`; returns the rendering and the next ip.
pub fn disassemble_at(unit: &BytecodeUnit, ip: usize) -> Option<(String, usize)> {
    let mut wide = false;
    let mut at = ip;
    let mut op = unit.op_at(at)?;
    if op == Op::Wide {
        wide = true;
        at += 1;
        op = unit.op_at(at)?;
    }
    at += 1;

    // First slot operand honors the Wide prefix; everything else is fixed.
    let slot = |at: &mut usize| -> u16 {
        if wide {
            let v = unit.u16_at(*at);
            *at += 2;
            v
        } else {
            let v = unit.u8_at(*at) as u16;
            *at += 1;
            v
        }
    };
    let u8 = |at: &mut usize| -> u8 {
        let v = unit.u8_at(*at);
        *at += 1;
        v
    };
    let u16f = |at: &mut usize| -> u16 {
        let v = unit.u16_at(*at);
        *at += 2;
        v
    };
    let u32f = |at: &mut usize| -> u32 {
        let v = unit.u32_at(*at);
        *at += 4;
        v
    };

    let name = op.name();
    let text = match op {
        // No operands.
        Op::Pop
        | Op::Dup
        | Op::DupMove
        | Op::Rot
        | Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Pow
        | Op::Ldiv
        | Op::AddDbl
        | Op::SubDbl
        | Op::MulDbl
        | Op::DivDbl
        | Op::PowDbl
        | Op::LdivDbl
        | Op::ElMul
        | Op::ElDiv
        | Op::ElPow
        | Op::ElLdiv
        | Op::ElAnd
        | Op::ElOr
        | Op::TransMul
        | Op::MulTrans
        | Op::HermMul
        | Op::MulHerm
        | Op::TransLdiv
        | Op::HermLdiv
        | Op::Le
        | Op::LeEq
        | Op::Gr
        | Op::GrEq
        | Op::Eq
        | Op::Neq
        | Op::LeDbl
        | Op::LeEqDbl
        | Op::GrDbl
        | Op::GrEqDbl
        | Op::EqDbl
        | Op::NeqDbl
        | Op::Not
        | Op::NotDbl
        | Op::NotBool
        | Op::Uadd
        | Op::Usub
        | Op::UsubDbl
        | Op::Trans
        | Op::Herm
        | Op::PushDbl0
        | Op::PushDbl1
        | Op::PushDbl2
        | Op::PushTrue
        | Op::PushFalse
        | Op::PushNil
        | Op::Ret
        | Op::RetAnon
        | Op::ForSetup
        | Op::ForComplexSetup
        | Op::Colon2
        | Op::Colon3
        | Op::Colon2Cmd
        | Op::Colon3Cmd
        | Op::EnterScriptFrame
        | Op::ExitScriptFrame
        | Op::EnterNestedFrame
        | Op::AnonMaybeSetIgnoreOutputs
        | Op::ExtNargout
        | Op::HandleSignals
        | Op::Debug
        | Op::BraindeadPrecondition
        | Op::ThrowIfErrObj => name.to_string(),

        // Single slot.
        Op::IncrIdPrefix
        | Op::IncrIdPostfix
        | Op::DecrIdPrefix
        | Op::DecrIdPostfix
        | Op::IncrIdPrefixDbl
        | Op::IncrIdPostfixDbl
        | Op::DecrIdPrefixDbl
        | Op::DecrIdPostfixDbl
        | Op::PushPi
        | Op::PushI
        | Op::PushE
        | Op::SetFoldedCst
        | Op::PushSlotNargout0
        | Op::PushSlotNargout1
        | Op::PushSlotNargout1Special
        | Op::PushSlotNx
        | Op::PushSlotDisp
        | Op::Assign
        | Op::ForceAssign
        | Op::BindAns
        | Op::SetSlotToStackDepth
        | Op::PushFcnHandle => {
            let s = slot(&mut at);
            format!("{name} {}", slot_name(unit, s))
        }

        Op::LoadCst => format!("{name} c{}", u8(&mut at)),
        Op::Load2Cst => format!("{name} c{}", u8(&mut at)),
        Op::LoadFarCst => format!("{name} c{}", u32f(&mut at)),
        Op::PushAnonFcnHandle => format!("{name} c{}", u16f(&mut at)),

        Op::PushSlotNargoutN => {
            let s = slot(&mut at);
            format!("{name} {} nargout={}", slot_name(unit, s), u8(&mut at))
        }
        Op::PushFoldedCst => {
            let s = slot(&mut at);
            format!("{name} {} -> {}", slot_name(unit, s), u16f(&mut at))
        }
        Op::AssignCompound => {
            let s = slot(&mut at);
            format!("{name} {} op={}", slot_name(unit, s), u8(&mut at))
        }
        Op::AssignN => {
            let n = u8(&mut at);
            let mut text = format!("{name}");
            for _ in 0..n {
                let s = u16f(&mut at);
                write!(text, " {}", slot_name(unit, s)).unwrap();
            }
            text
        }

        Op::Jmp | Op::JmpIf | Op::JmpIfn | Op::JmpIfBool | Op::JmpIfnBool
        | Op::JmpIfnCaseMatch => format!("{name} -> {}", u16f(&mut at)),
        Op::JmpIfDef => {
            let s = u16f(&mut at);
            format!("{name} {} -> {}", slot_name(unit, s), u16f(&mut at))
        }

        Op::IndexIdNargout0
        | Op::IndexIdNargout1
        | Op::IndexId1Mat1d
        | Op::IndexId1Mat2d
        | Op::IndexIdNx
        | Op::IndexCellIdNargout0
        | Op::IndexCellIdNargout1
        | Op::IndexCellIdNx
        | Op::WordCmdNx
        | Op::SubassignId
        | Op::SubassignIdMat1d
        | Op::SubassignIdMat2d
        | Op::SubassignCellId => {
            let s = slot(&mut at);
            format!("{name} {} nargs={}", slot_name(unit, s), u8(&mut at))
        }
        Op::IndexIdN | Op::IndexCellIdN => {
            let s = slot(&mut at);
            let nargs = u8(&mut at);
            format!(
                "{name} {} nargs={nargs} nargout={}",
                slot_name(unit, s),
                u8(&mut at)
            )
        }
        Op::WordCmd => {
            let s = slot(&mut at);
            let nargout = u8(&mut at);
            format!(
                "{name} {} nargout={nargout} nargs={}",
                slot_name(unit, s),
                u8(&mut at)
            )
        }
        Op::IndexStructNargoutN => {
            let nargout = u8(&mut at);
            let field = u16f(&mut at);
            format!("{name} nargout={nargout} field={}", id_name(unit, field))
        }
        Op::IndexStructCall => {
            let nargs = u8(&mut at);
            format!("{name} nargs={nargs} kind={}", u8(&mut at) as char)
        }
        Op::IndexStructSubcall => {
            let i = u8(&mut at);
            let n = u8(&mut at);
            let nargs = u8(&mut at);
            format!(
                "{name} {i}/{n} nargs={nargs} kind={}",
                u8(&mut at) as char
            )
        }
        Op::IndexObj => {
            let nargout = u8(&mut at);
            let nargs = u8(&mut at);
            format!(
                "{name} nargout={nargout} nargs={nargs} kind={}",
                u8(&mut at) as char
            )
        }
        Op::SubassignObj => {
            let nargs = u8(&mut at);
            format!("{name} nargs={nargs} kind={}", u8(&mut at) as char)
        }
        Op::SubassignStruct => {
            let s = slot(&mut at);
            let field = u16f(&mut at);
            format!("{name} {} field={}", slot_name(unit, s), id_name(unit, field))
        }
        Op::SubassignChained => {
            let s = slot(&mut at);
            let op_byte = u8(&mut at);
            let n = u8(&mut at);
            let mut text = format!("{name} {} op={op_byte}", slot_name(unit, s));
            for _ in 0..n {
                let nargs = u8(&mut at);
                let kind = u8(&mut at) as char;
                write!(text, " ({nargs},{kind})").unwrap();
            }
            text
        }
        Op::Eval => {
            let nargout = u8(&mut at);
            format!("{name} nargout={nargout} tree={:#x}", u32f(&mut at))
        }

        Op::ForCond => {
            let s = slot(&mut at);
            format!("{name} {} after={}", slot_name(unit, s), u16f(&mut at))
        }
        Op::ForComplexCond => {
            let after = u16f(&mut at);
            let k = u16f(&mut at);
            let v = u16f(&mut at);
            format!(
                "{name} after={after} key={} val={}",
                slot_name(unit, k),
                slot_name(unit, v)
            )
        }
        Op::PopNInts => format!("{name} {}", u8(&mut at)),
        Op::DupN => {
            let off = u8(&mut at);
            format!("{name} offset={off} n={}", u8(&mut at))
        }

        Op::Matrix => {
            let rows = u8(&mut at);
            format!("{name} {rows}x{}", u8(&mut at))
        }
        Op::MatrixUneven => {
            let kind = u8(&mut at);
            if kind == 1 {
                let rows = u32f(&mut at);
                format!("{name} {rows}x{}", u32f(&mut at))
            } else {
                let n = u32f(&mut at);
                let mut text = format!("{name} rows={n} lens=[");
                for i in 0..n {
                    if i > 0 {
                        text.push(',');
                    }
                    write!(text, "{}", u32f(&mut at)).unwrap();
                }
                text.push(']');
                text
            }
        }
        Op::PushCell => {
            let rows = u8(&mut at);
            format!("{name} {rows}x{}", u8(&mut at))
        }
        Op::PushCellBig => {
            let rows = u32f(&mut at);
            format!("{name} {rows}x{}", u32f(&mut at))
        }
        Op::AppendCell => format!("{name} tag={}", u8(&mut at)),

        Op::GlobalInit => {
            let kind = u8(&mut at);
            let s = u16f(&mut at);
            let has_init = u8(&mut at);
            format!(
                "{name} kind={kind} {} init={has_init} skip={}",
                slot_name(unit, s),
                u16f(&mut at)
            )
        }
        Op::InstallFunction => {
            let s = slot(&mut at);
            format!("{name} {} c{}", slot_name(unit, s), u16f(&mut at))
        }

        Op::SetIgnoreOutputs => {
            let n = u8(&mut at);
            let total = u8(&mut at);
            let mut text = format!("{name} total={total} ignored=[");
            for i in 0..n {
                if i > 0 {
                    text.push(',');
                }
                write!(text, "{}", u8(&mut at)).unwrap();
            }
            text.push(']');
            text
        }
        Op::ClearIgnoreOutputs => {
            let n = u8(&mut at);
            let mut text = format!("{name}");
            for _ in 0..n {
                let s = u16f(&mut at);
                write!(text, " {}", slot_name(unit, s)).unwrap();
            }
            text
        }

        Op::Disp => {
            let s = slot(&mut at);
            format!("{name} {} cmd={}", slot_name(unit, s), u16f(&mut at))
        }
        Op::BraindeadWarning => {
            let s = slot(&mut at);
            format!("{name} {} kind={}", slot_name(unit, s), u8(&mut at))
        }

        Op::EndId => {
            let s = slot(&mut at);
            let nargs = u8(&mut at);
            format!("{name} {} nargs={nargs} idx={}", slot_name(unit, s), u8(&mut at))
        }
        Op::EndObj => {
            let off = u8(&mut at);
            let nargs = u8(&mut at);
            format!("{name} depth={off} nargs={nargs} idx={}", u8(&mut at))
        }
        Op::EndXN => {
            let n = u8(&mut at);
            let mut text = format!("{name}");
            for _ in 0..n {
                let nargs = u8(&mut at);
                let idx = u8(&mut at);
                let kind = u8(&mut at) as char;
                let s = u16f(&mut at);
                write!(text, " ({nargs},{idx},{kind},{})", slot_name(unit, s)).unwrap();
            }
            text
        }

        // Wide never reaches here; it is folded into the prefix handling.
        Op::Wide => name.to_string(),
    };

    Some((text, at))
}

fn slot_name(unit: &BytecodeUnit, slot: u16) -> String {
    match unit.ids.get(slot as usize) {
        Some(id) => format!("%{slot}({id})"),
        None => format!("%{slot}"),
    }
}

fn id_name(unit: &BytecodeUnit, id: u16) -> String {
    match unit.ids.get(id as usize) {
        Some(name) => name.to_string(),
        None => format!("<id {id}>"),
    }
}
