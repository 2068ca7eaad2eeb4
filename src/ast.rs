// パス: src/ast.rs
// 役割: 名前解決済みのプログラム木と演算子・組込み数学関数の定義
// 意図: コンパイル結果を評価器がそのまま辿れる形で保持する
// 関連ファイル: src/parser.rs, src/evaluator.rs, src/engine.rs
//! 解決済みプログラム木
//!
//! 変数参照はコンパイル時に `Slot` へ解決済み。`Global` は環境エントリの添字、
//! `Local` はブロック/ループ内で宣言された評価フレーム上の添字を指す。

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::engine::SymbolEntry;
use crate::symbols::{Arity, Builtin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Global(usize),
    Local(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// 代入先。
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Scalar(Slot),
    Element { slot: Slot, index: Box<Node> },
}

/// 宣言時の初期化子。
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    Scalar(Option<Box<Node>>),
    Vector { size: usize, items: Vec<Node> },
    Str(Box<Node>),
}

/// 言語組込みの数学関数。環境には登録されず、名前は予約語扱い。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Ceil,
    Round,
    Trunc,
    Frac,
    Sgn,
    Atan2,
    Hypot,
    Clamp,
    Min,
    Max,
    Avg,
    Sum,
}

static INTRINSICS: Lazy<FxHashMap<&'static str, Intrinsic>> = Lazy::new(|| {
    use Intrinsic::*;
    [
        ("abs", Abs),
        ("sqrt", Sqrt),
        ("exp", Exp),
        ("log", Log),
        ("log10", Log10),
        ("log2", Log2),
        ("sin", Sin),
        ("cos", Cos),
        ("tan", Tan),
        ("asin", Asin),
        ("acos", Acos),
        ("atan", Atan),
        ("sinh", Sinh),
        ("cosh", Cosh),
        ("tanh", Tanh),
        ("floor", Floor),
        ("ceil", Ceil),
        ("round", Round),
        ("trunc", Trunc),
        ("frac", Frac),
        ("sgn", Sgn),
        ("atan2", Atan2),
        ("hypot", Hypot),
        ("clamp", Clamp),
        ("min", Min),
        ("max", Max),
        ("avg", Avg),
        ("sum", Sum),
    ]
    .into_iter()
    .collect()
});

impl Intrinsic {
    pub fn lookup(name: &str) -> Option<Intrinsic> {
        INTRINSICS.get(name).copied()
    }

    pub fn arity(self) -> Arity {
        use Intrinsic::*;
        match self {
            Atan2 | Hypot => Arity::Exact(2),
            Clamp => Arity::Exact(3),
            Min | Max | Avg | Sum => Arity::Variadic,
            _ => Arity::Exact(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // スカラー値
    Number(f64),
    Load(Slot),
    Element {
        slot: Slot,
        index: Box<Node>,
    },
    Size(Slot),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    StrCompare(BinaryOp, Box<Node>, Box<Node>),
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    Assign {
        target: Target,
        op: AssignOp,
        value: Box<Node>,
    },
    Declare {
        slot: Slot,
        init: Init,
    },
    Call {
        func: Builtin,
        args: Vec<Node>,
    },
    Intrinsic {
        func: Intrinsic,
        args: Vec<Node>,
    },
    Block(Vec<Node>),
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        step: Option<Box<Node>>,
        body: Box<Node>,
    },
    Break(Option<Box<Node>>),
    Continue,
    // 文字列値
    Str(String),
    StrLoad(Slot),
    StrConcat(Box<Node>, Box<Node>),
    StrAssign {
        slot: Slot,
        append: bool,
        value: Box<Node>,
    },
}

impl Node {
    /// 文字列を生成するノードかどうか。
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            Node::Str(_) | Node::StrLoad(_) | Node::StrConcat(..) | Node::StrAssign { .. }
        )
    }
}

/// コンパイル済みプログラム。束縛した環境の世代番号を保持する。
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub(crate) body: Vec<Node>,
    pub(crate) frame_size: usize,
    pub(crate) generation: u64,
    pub(crate) symbols: Vec<SymbolEntry>,
    pub(crate) assignments: Vec<SymbolEntry>,
}

impl CompiledProgram {
    /// 束縛先環境の世代番号。
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// トップレベル文の数。
    pub fn statement_count(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_lookup_and_arity() {
        assert_eq!(Intrinsic::lookup("sin"), Some(Intrinsic::Sin));
        assert_eq!(Intrinsic::lookup("println"), None);
        assert_eq!(Intrinsic::Clamp.arity(), Arity::Exact(3));
        assert_eq!(Intrinsic::Max.arity(), Arity::Variadic);
    }

    #[test]
    fn string_nodes_are_classified() {
        assert!(Node::Str("a".into()).is_string());
        assert!(Node::StrLoad(Slot::Global(0)).is_string());
        assert!(!Node::Number(1.0).is_string());
        assert!(!Node::Load(Slot::Local(0)).is_string());
    }
}
