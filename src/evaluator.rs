//! 評価器（evaluator）
//!
//! 目的:
//! - 解決済みプログラム木を木構造のまま辿って評価する。
//! - 大域変数はシンボル環境、ブロック内の宣言は評価フレームに置く。
//!
//! 仕様要点:
//! - プログラムの値は最後に実行された文の値（文字列文なら NaN）。
//! - 範囲外のベクトル参照は NaN。真偽値は `0.0` / `1.0`。
//! - 束縛先環境の世代が変わっていれば評価を拒否する。

use std::cmp::Ordering;
use std::io::Write;

use tracing::trace;

use crate::ast::{AssignOp, BinaryOp, CompiledProgram, Init, Intrinsic, Node, Slot, Target, UnaryOp};
use crate::errors::EvalError;
use crate::symbols::{Builtin, SymbolEnvironment, SymbolValue};

/// 評価中の大域脱出。
enum Flow {
    Break(Option<f64>),
    Continue,
    Fail(EvalError),
}

impl From<std::io::Error> for Flow {
    fn from(e: std::io::Error) -> Self {
        Flow::Fail(e.into())
    }
}

type Step<T = f64> = Result<T, Flow>;

struct Machine<'a, 'w> {
    env: &'a mut SymbolEnvironment,
    locals: Vec<SymbolValue>,
    out: &'a mut (dyn Write + 'w),
}

/// コンパイル済みプログラムを評価する。
pub fn evaluate(
    program: &CompiledProgram,
    env: &mut SymbolEnvironment,
    out: &mut dyn Write,
) -> Result<f64, EvalError> {
    if program.generation != env.generation() {
        return Err(EvalError::StaleProgram {
            bound: program.generation,
            current: env.generation(),
        });
    }
    let mut machine = Machine {
        env,
        locals: vec![SymbolValue::Scalar(0.0); program.frame_size],
        out,
    };
    let mut last = f64::NAN;
    for stmt in &program.body {
        match machine.value(stmt) {
            Ok(v) => last = v,
            Err(Flow::Break(v)) => last = v.unwrap_or(f64::NAN),
            Err(Flow::Continue) => {}
            Err(Flow::Fail(e)) => return Err(e),
        }
    }
    machine.out.flush()?;
    trace!(result = last, "program evaluated");
    Ok(last)
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn is_true(v: f64) -> bool {
    v != 0.0
}

impl<'a, 'w> Machine<'a, 'w> {
    fn slot(&self, slot: Slot) -> Option<&SymbolValue> {
        match slot {
            Slot::Global(i) => self.env.symbol(i).map(|s| &s.value),
            Slot::Local(i) => self.locals.get(i),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut SymbolValue> {
        match slot {
            Slot::Global(i) => self.env.value_mut(i),
            Slot::Local(i) => self.locals.get_mut(i),
        }
    }

    fn store(&mut self, slot: Slot, value: SymbolValue) {
        if let Some(cell) = self.slot_mut(slot) {
            *cell = value;
        }
    }

    /// 任意の文を評価し、スカラー値に揃える。
    fn value(&mut self, node: &Node) -> Step {
        if node.is_string() {
            self.eval_str(node)?;
            return Ok(f64::NAN);
        }
        self.eval(node)
    }

    fn eval(&mut self, node: &Node) -> Step {
        match node {
            Node::Number(v) => Ok(*v),
            Node::Load(slot) => Ok(match self.slot(*slot) {
                Some(SymbolValue::Scalar(v)) => *v,
                _ => f64::NAN,
            }),
            Node::Element { slot, index } => {
                let i = self.eval(index)?;
                Ok(match self.element_mut(*slot, i) {
                    Some(v) => *v,
                    None => f64::NAN,
                })
            }
            Node::Size(slot) => Ok(match self.slot(*slot) {
                Some(SymbolValue::Vector(v)) => v.len() as f64,
                _ => f64::NAN,
            }),
            Node::Unary(op, e) => {
                let v = self.eval(e)?;
                Ok(match op {
                    UnaryOp::Neg => -v,
                    UnaryOp::Pos => v,
                    UnaryOp::Not => truth(!is_true(v)),
                })
            }
            Node::Binary(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                Ok(binary(*op, a, b))
            }
            Node::And(l, r) => {
                if !is_true(self.eval(l)?) {
                    return Ok(0.0);
                }
                Ok(truth(is_true(self.eval(r)?)))
            }
            Node::Or(l, r) => {
                if is_true(self.eval(l)?) {
                    return Ok(1.0);
                }
                Ok(truth(is_true(self.eval(r)?)))
            }
            Node::StrCompare(op, l, r) => {
                let a = self.eval_str(l)?;
                let b = self.eval_str(r)?;
                let ord = a.cmp(&b);
                Ok(match op {
                    BinaryOp::Eq => truth(ord == Ordering::Equal),
                    BinaryOp::Ne => truth(ord != Ordering::Equal),
                    BinaryOp::Lt => truth(ord == Ordering::Less),
                    BinaryOp::Le => truth(ord != Ordering::Greater),
                    BinaryOp::Gt => truth(ord == Ordering::Greater),
                    BinaryOp::Ge => truth(ord != Ordering::Less),
                    _ => f64::NAN,
                })
            }
            Node::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if is_true(self.eval(cond)?) {
                    self.value(then)
                } else if let Some(o) = otherwise {
                    self.value(o)
                } else {
                    Ok(f64::NAN)
                }
            }
            Node::Assign { target, op, value } => self.assign(target, *op, value),
            Node::Declare { slot, init } => self.declare(*slot, init),
            Node::Call { func, args } => self.call(*func, args),
            Node::Intrinsic { func, args } => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(self.eval(a)?);
                }
                Ok(intrinsic(*func, &vals))
            }
            Node::Block(stmts) => {
                let mut last = f64::NAN;
                for s in stmts {
                    last = self.value(s)?;
                }
                Ok(last)
            }
            Node::While { cond, body } => {
                let mut last = f64::NAN;
                while is_true(self.eval(cond)?) {
                    match self.value(body) {
                        Ok(v) => last = v,
                        Err(Flow::Break(v)) => {
                            if let Some(v) = v {
                                last = v;
                            }
                            break;
                        }
                        Err(Flow::Continue) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(last)
            }
            Node::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.value(init)?;
                }
                let mut last = f64::NAN;
                loop {
                    if let Some(c) = cond {
                        if !is_true(self.eval(c)?) {
                            break;
                        }
                    }
                    match self.value(body) {
                        Ok(v) => last = v,
                        Err(Flow::Break(v)) => {
                            if let Some(v) = v {
                                last = v;
                            }
                            break;
                        }
                        Err(Flow::Continue) => {}
                        Err(e) => return Err(e),
                    }
                    if let Some(s) = step {
                        self.value(s)?;
                    }
                }
                Ok(last)
            }
            Node::Break(v) => {
                let v = match v {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                Err(Flow::Break(v))
            }
            Node::Continue => Err(Flow::Continue),
            Node::Str(_) | Node::StrLoad(_) | Node::StrConcat(..) | Node::StrAssign { .. } => {
                self.eval_str(node)?;
                Ok(f64::NAN)
            }
        }
    }

    fn eval_str(&mut self, node: &Node) -> Step<String> {
        match node {
            Node::Str(s) => Ok(s.clone()),
            Node::StrLoad(slot) => Ok(match self.slot(*slot) {
                Some(SymbolValue::Str(s)) => s.clone(),
                _ => String::new(),
            }),
            Node::StrConcat(l, r) => {
                let mut a = self.eval_str(l)?;
                a.push_str(&self.eval_str(r)?);
                Ok(a)
            }
            Node::StrAssign {
                slot,
                append,
                value,
            } => {
                let v = self.eval_str(value)?;
                match self.slot_mut(*slot) {
                    Some(SymbolValue::Str(s)) => {
                        if *append {
                            s.push_str(&v);
                        } else {
                            *s = v;
                        }
                        Ok(s.clone())
                    }
                    _ => Ok(String::new()),
                }
            }
            other => Ok(self.eval(other)?.to_string()),
        }
    }

    fn element_mut(&mut self, slot: Slot, index: f64) -> Option<&mut f64> {
        if index.is_nan() || index < 0.0 {
            return None;
        }
        match self.slot_mut(slot)? {
            SymbolValue::Vector(v) => v.get_mut(index as usize),
            _ => None,
        }
    }

    fn assign(&mut self, target: &Target, op: AssignOp, value: &Node) -> Step {
        match target {
            Target::Scalar(slot) => {
                let v = self.eval(value)?;
                match self.slot_mut(*slot) {
                    Some(SymbolValue::Scalar(cur)) => {
                        *cur = apply(op, *cur, v);
                        Ok(*cur)
                    }
                    _ => Ok(f64::NAN),
                }
            }
            Target::Element { slot, index } => {
                let i = self.eval(index)?;
                let v = self.eval(value)?;
                match self.element_mut(*slot, i) {
                    Some(cur) => {
                        *cur = apply(op, *cur, v);
                        Ok(*cur)
                    }
                    None => Ok(f64::NAN),
                }
            }
        }
    }

    fn declare(&mut self, slot: Slot, init: &Init) -> Step {
        match init {
            Init::Scalar(e) => {
                let v = match e {
                    Some(e) => self.eval(e)?,
                    None => 0.0,
                };
                self.store(slot, SymbolValue::Scalar(v));
                Ok(v)
            }
            Init::Vector { size, items } => {
                let mut vals = vec![0.0; *size];
                for (cell, item) in vals.iter_mut().zip(items) {
                    *cell = self.eval(item)?;
                }
                self.store(slot, SymbolValue::Vector(vals));
                Ok(f64::NAN)
            }
            Init::Str(e) => {
                let s = self.eval_str(e)?;
                self.store(slot, SymbolValue::Str(s));
                Ok(f64::NAN)
            }
        }
    }

    fn call(&mut self, func: Builtin, args: &[Node]) -> Step {
        match func {
            Builtin::Putch => {
                let v = self.eval(&args[0])?;
                let c = char::from_u32(v as u32).unwrap_or('?');
                write!(self.out, "{}", c)?;
                Ok(0.0)
            }
            Builtin::Putint => {
                let v = self.eval(&args[0])?;
                write!(self.out, "{}", v as i64)?;
                Ok(0.0)
            }
            Builtin::Print | Builtin::Println => {
                let mut parts = Vec::with_capacity(args.len());
                for a in args {
                    if a.is_string() {
                        parts.push(self.eval_str(a)?);
                    } else {
                        parts.push(self.eval(a)?.to_string());
                    }
                }
                write!(self.out, "{}", parts.join(" "))?;
                if func == Builtin::Println {
                    writeln!(self.out)?;
                }
                Ok(0.0)
            }
            Builtin::Poly(_) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(self.eval(a)?);
                }
                Ok(horner(&vals))
            }
        }
    }
}

/// `vals[0]` を x、残りを c_n..c_0 として多項式を評価する。
fn horner(vals: &[f64]) -> f64 {
    let Some((&x, coeffs)) = vals.split_first() else {
        return f64::NAN;
    };
    coeffs.iter().fold(0.0, |acc, c| acc * x + c)
}

fn apply(op: AssignOp, cur: f64, v: f64) -> f64 {
    match op {
        AssignOp::Set => v,
        AssignOp::Add => cur + v,
        AssignOp::Sub => cur - v,
        AssignOp::Mul => cur * v,
        AssignOp::Div => cur / v,
        AssignOp::Mod => cur % v,
    }
}

fn binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Eq => truth(a == b),
        BinaryOp::Ne => truth(a != b),
        BinaryOp::Lt => truth(a < b),
        BinaryOp::Le => truth(a <= b),
        BinaryOp::Gt => truth(a > b),
        BinaryOp::Ge => truth(a >= b),
        BinaryOp::Xor => truth(is_true(a) != is_true(b)),
    }
}

fn intrinsic(func: Intrinsic, v: &[f64]) -> f64 {
    use Intrinsic::*;
    let x = v.first().copied().unwrap_or(f64::NAN);
    match func {
        Abs => x.abs(),
        Sqrt => x.sqrt(),
        Exp => x.exp(),
        Log => x.ln(),
        Log10 => x.log10(),
        Log2 => x.log2(),
        Sin => x.sin(),
        Cos => x.cos(),
        Tan => x.tan(),
        Asin => x.asin(),
        Acos => x.acos(),
        Atan => x.atan(),
        Sinh => x.sinh(),
        Cosh => x.cosh(),
        Tanh => x.tanh(),
        Floor => x.floor(),
        Ceil => x.ceil(),
        Round => x.round(),
        Trunc => x.trunc(),
        Frac => x.fract(),
        Sgn => {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                x * 0.0
            }
        }
        Atan2 => x.atan2(v[1]),
        Hypot => x.hypot(v[1]),
        // clamp(lo, x, hi)
        Clamp => {
            let (lo, val, hi) = (v[0], v[1], v[2]);
            if val < lo {
                lo
            } else if val > hi {
                hi
            } else {
                val
            }
        }
        Min => v.iter().copied().fold(f64::INFINITY, f64::min),
        Max => v.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Sum => v.iter().sum(),
        Avg => v.iter().sum::<f64>() / v.len() as f64,
    }
}
