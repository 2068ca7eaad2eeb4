// パス: src/symbols.rs
// 役割: 変数・ベクトル・文字列・関数を保持するシンボル環境を提供する
// 意図: 評価をまたいだ永続化方針 (Fresh / Persisted) を単一の経路で強制する
// 関連ファイル: src/parser.rs, src/evaluator.rs, src/repl/cmd.rs
//! シンボル環境
//!
//! - 登録順を保持する（`$list_vars` やダンプ出力の再現性のため）。
//! - 定数・関数・予約文字列スロット (`s0`..`s3`) は起動時に一度だけ登録され、削除されない。
//! - 構造変更（追加・パージ）のたびに世代番号を進め、古いコンパイル済みプログラムを検出可能にする。

use rustc_hash::FxHashMap;
use tracing::debug;

/// 予約済みのローカル文字列スロット名。
pub const STRING_SLOTS: [&str; 4] = ["s0", "s1", "s2", "s3"];

/// 起動時に登録される定数一覧。
pub const CONSTANTS: [(&str, f64); 4] = [
    ("pi", std::f64::consts::PI),
    ("epsilon", f64::EPSILON),
    ("inf", f64::INFINITY),
    ("e", std::f64::consts::E),
];

/// 環境に登録される組込み関数の固定ロースター。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Putch,
    Putint,
    Print,
    Println,
    /// 次数 1..=12 の多項式評価器。
    Poly(u8),
}

/// 関数の引数個数制約。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Builtin {
    /// 登録順どおりの組込み関数一覧。
    pub fn roster() -> Vec<Builtin> {
        let mut all = vec![
            Builtin::Putch,
            Builtin::Putint,
            Builtin::Print,
            Builtin::Println,
        ];
        all.extend((1..=12).map(Builtin::Poly));
        all
    }

    pub fn name(self) -> String {
        match self {
            Builtin::Putch => "putch".into(),
            Builtin::Putint => "putint".into(),
            Builtin::Print => "print".into(),
            Builtin::Println => "println".into(),
            Builtin::Poly(n) => format!("poly{:02}", n),
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Builtin::Putch | Builtin::Putint => Arity::Exact(1),
            Builtin::Print | Builtin::Println => Arity::Variadic,
            // x と係数 c_n..c_0
            Builtin::Poly(n) => Arity::Exact(n as usize + 2),
        }
    }

    /// 文字列引数を受け付けるかどうか。
    pub fn accepts_strings(self) -> bool {
        matches!(self, Builtin::Print | Builtin::Println)
    }
}

/// 環境エントリが保持する値。
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Str(String),
    Function(Builtin),
}

/// エントリの出自。パージ対象は `User` のみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Constant,
    Reserved,
    Function,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub value: SymbolValue,
    pub origin: Origin,
}

/// 評価前の環境準備方針。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentPolicy {
    /// 利用者定義のエントリを毎回破棄する。
    Fresh,
    /// 直前の評価の変数を引き継ぐ。
    Persisted,
}

impl EnvironmentPolicy {
    pub fn from_persist_flag(persist: bool) -> Self {
        if persist {
            EnvironmentPolicy::Persisted
        } else {
            EnvironmentPolicy::Fresh
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolEnvironment {
    entries: Vec<Symbol>,
    index: FxHashMap<String, usize>,
    generation: u64,
}

impl Default for SymbolEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolEnvironment {
    /// 組込みを登録済みの環境を構築する。
    pub fn new() -> Self {
        let mut env = Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
            generation: 0,
        };
        env.register_builtins();
        env
    }

    /// 定数・関数ロースター・予約文字列スロットを登録する（冪等）。
    pub fn register_builtins(&mut self) {
        self.register_constants();
        for f in Builtin::roster() {
            self.insert_if_absent(&f.name(), SymbolValue::Function(f), Origin::Function);
        }
        self.register_string_slots();
    }

    fn register_constants(&mut self) {
        for (name, value) in CONSTANTS {
            self.insert_if_absent(name, SymbolValue::Scalar(value), Origin::Constant);
        }
    }

    fn register_string_slots(&mut self) {
        for name in STRING_SLOTS {
            self.insert_if_absent(name, SymbolValue::Str(String::new()), Origin::Reserved);
        }
    }

    /// 方針に従って環境を準備する。パージが発生した場合は `true` を返す。
    pub fn prepare(&mut self, policy: EnvironmentPolicy) -> bool {
        match policy {
            EnvironmentPolicy::Persisted => false,
            EnvironmentPolicy::Fresh => {
                self.purge();
                true
            }
        }
    }

    /// 永続化フラグが偽なら利用者定義エントリを破棄する。
    pub fn reset_if_not_persisted(&mut self, persist: bool) -> bool {
        self.prepare(EnvironmentPolicy::from_persist_flag(persist))
    }

    /// 利用者定義エントリを除去し、定数と文字列スロットを再登録する。
    pub fn purge(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|s| s.origin != Origin::User);
        self.rebuild_index();
        self.register_constants();
        self.register_string_slots();
        self.generation += 1;
        debug!(
            removed = before.saturating_sub(self.entries.len()),
            generation = self.generation,
            "symbol environment purged"
        );
    }

    /// 利用者定義のスカラー変数を登録順で列挙する。
    pub fn list_variables(&self) -> Vec<(String, f64)> {
        self.entries
            .iter()
            .filter(|s| s.origin == Origin::User)
            .filter_map(|s| match s.value {
                SymbolValue::Scalar(v) => Some((s.name.clone(), v)),
                _ => None,
            })
            .collect()
    }

    /// 利用者定義のスカラー変数を追加する。既存名なら `false`。
    pub fn add_variable(&mut self, name: &str, value: f64) -> bool {
        self.add_user(name, SymbolValue::Scalar(value))
    }

    pub fn add_vector(&mut self, name: &str, values: Vec<f64>) -> bool {
        self.add_user(name, SymbolValue::Vector(values))
    }

    pub fn add_string(&mut self, name: &str, value: impl Into<String>) -> bool {
        self.add_user(name, SymbolValue::Str(value.into()))
    }

    fn add_user(&mut self, name: &str, value: SymbolValue) -> bool {
        if self.index.contains_key(name) {
            return false;
        }
        self.push(name, value, Origin::User);
        self.generation += 1;
        true
    }

    /// コンパイル成功時に保留中の利用者定義エントリを一括登録する。
    pub(crate) fn commit(&mut self, pending: Vec<(String, SymbolValue)>) {
        if pending.is_empty() {
            return;
        }
        for (name, value) in pending {
            if !self.index.contains_key(&name) {
                self.push(&name, value, Origin::User);
            }
        }
        self.generation += 1;
    }

    pub fn lookup(&self, name: &str) -> Option<(usize, &Symbol)> {
        let idx = *self.index.get(name)?;
        Some((idx, &self.entries[idx]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn symbol(&self, idx: usize) -> Option<&Symbol> {
        self.entries.get(idx)
    }

    pub(crate) fn value_mut(&mut self, idx: usize) -> Option<&mut SymbolValue> {
        self.entries.get_mut(idx).map(|s| &mut s.value)
    }

    /// 名前で値を取得する。スカラー以外は `None`。
    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.lookup(name)?.1.value {
            SymbolValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match &self.lookup(name)?.1.value {
            SymbolValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn insert_if_absent(&mut self, name: &str, value: SymbolValue, origin: Origin) {
        if !self.index.contains_key(name) {
            self.push(name, value, origin);
        }
    }

    fn push(&mut self, name: &str, value: SymbolValue, origin: Origin) {
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(Symbol {
            name: name.to_string(),
            value,
            origin,
        });
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, s) in self.entries.iter().enumerate() {
            self.index.insert(s.name.clone(), i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 組込み登録が冪等であることを確認する。
    fn register_builtins_is_idempotent() {
        let mut env = SymbolEnvironment::new();
        let n = env.len();
        env.register_builtins();
        assert_eq!(env.len(), n);
        assert_eq!(n, CONSTANTS.len() + 16 + STRING_SLOTS.len());
        assert!(env.contains("poly12"));
        assert!(env.contains("s3"));
        assert_eq!(env.scalar("pi"), Some(std::f64::consts::PI));
    }

    #[test]
    fn list_variables_preserves_registration_order() {
        let mut env = SymbolEnvironment::new();
        assert!(env.list_variables().is_empty());
        assert!(env.add_variable("b", 2.5));
        assert!(env.add_variable("a", 1.0));
        assert!(!env.add_variable("a", 9.0));
        assert_eq!(
            env.list_variables(),
            vec![("b".to_string(), 2.5), ("a".to_string(), 1.0)]
        );
    }

    #[test]
    /// Fresh 方針でのパージが利用者定義のみを除去することを確認する。
    fn fresh_policy_purges_user_entries_only() {
        let mut env = SymbolEnvironment::new();
        env.add_variable("x", 1.0);
        env.add_vector("v", vec![1.0, 2.0]);
        env.add_string("t", "hi");
        if let Some((idx, _)) = env.lookup("s0") {
            *env.value_mut(idx).unwrap() = SymbolValue::Str("kept".into());
        }
        let gen = env.generation();
        assert!(env.prepare(EnvironmentPolicy::Fresh));
        assert!(!env.contains("x"));
        assert!(!env.contains("v"));
        assert!(!env.contains("t"));
        assert!(env.contains("println"));
        assert!(env.contains("e"));
        assert_eq!(env.string("s0"), Some("kept"));
        assert!(env.generation() > gen);
        // パージ後もインデックスが整合している。
        let (idx, sym) = env.lookup("s3").unwrap();
        assert_eq!(env.symbol(idx).unwrap().name, sym.name);
    }

    #[test]
    fn persisted_policy_is_a_no_op() {
        let mut env = SymbolEnvironment::new();
        env.add_variable("k", 10.0);
        let gen = env.generation();
        assert!(!env.reset_if_not_persisted(true));
        assert_eq!(env.scalar("k"), Some(10.0));
        assert_eq!(env.generation(), gen);
    }

    #[test]
    fn commit_appends_in_order_and_bumps_generation() {
        let mut env = SymbolEnvironment::new();
        let gen = env.generation();
        env.commit(vec![
            ("q".into(), SymbolValue::Scalar(0.0)),
            ("p".into(), SymbolValue::Scalar(0.0)),
        ]);
        let names: Vec<String> = env.list_variables().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["q", "p"]);
        assert_eq!(env.generation(), gen + 1);
    }

    #[test]
    fn builtin_names_and_arity() {
        assert_eq!(Builtin::Poly(3).name(), "poly03");
        assert_eq!(Builtin::Poly(3).arity(), Arity::Exact(5));
        assert_eq!(Builtin::Println.arity(), Arity::Variadic);
        assert_eq!(Builtin::roster().len(), 16);
    }
}
