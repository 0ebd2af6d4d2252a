//! Static Phase 1 / Phase 2 content bank.
//!
//! The full content bank (`screen_bank.py`'s complete weight matrix) is
//! out of scope — Non-goals exclude the immutable content bank itself.
//! This is a representative, functioning subset covering all 4 axes and
//! all 5 layers so the orchestrator's phase transitions and the engine's
//! math can be exercised end to end.

use gate_engine::{AxisWeights, LayerWeights};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenOption {
    pub text: String,
    pub axis_weights: AxisWeights,
    pub layer_weights: LayerWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase1Screen {
    pub screen_id: String,
    pub prompt: String,
    pub options: Vec<ScreenOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase2Template {
    pub node: String,
    pub reference_question: String,
    pub diagnostic_split: String,
    pub options: Vec<ScreenOption>,
}

fn opt(text: &str, a: [f64; 4], l: [f64; 5]) -> ScreenOption {
    ScreenOption {
        text: text.to_string(),
        axis_weights: AxisWeights {
            a1: a[0],
            a2: a[1],
            a3: a[2],
            a4: a[3],
        },
        layer_weights: LayerWeights {
            l0: l[0],
            l1: l[1],
            l2: l[2],
            l3: l[3],
            l4: l[4],
        },
    }
}

pub fn get_phase1_screen(index: usize) -> Phase1Screen {
    let screens: [(&str, &str, [(&str, [f64; 4], [f64; 5]); 3]); 6] = [
        (
            "screen_0",
            "Когда клиент сталкивается с критикой, он обычно:",
            [
                ("замыкается и уходит в себя", [0.6, -0.2, 0.0, 0.0], [0.5, 0.2, 0.0, 0.0, 0.0]),
                ("спорит и доказывает свою правоту", [0.0, 0.7, 0.0, 0.0], [0.2, 0.5, 0.0, 0.0, 0.0]),
                ("соглашается, чтобы не обострять", [-0.5, 0.0, 0.3, 0.0], [0.3, 0.0, 0.4, 0.0, 0.0]),
            ],
        ),
        (
            "screen_1",
            "В отношениях с близкими клиент чаще:",
            [
                ("берёт на себя ответственность за всё", [0.0, 0.0, 0.6, 0.0], [0.0, 0.3, 0.5, 0.0, 0.0]),
                ("избегает конфликтов любой ценой", [0.4, -0.3, 0.0, 0.0], [0.4, 0.0, 0.0, 0.2, 0.0]),
                ("требует от других соответствовать ожиданиям", [0.0, 0.5, 0.0, 0.3], [0.0, 0.4, 0.0, 0.0, 0.2]),
            ],
        ),
        (
            "screen_2",
            "Столкнувшись с неопределённостью, клиент:",
            [
                ("тревожится и ищет контроль", [0.0, 0.0, 0.0, 0.7], [0.0, 0.0, 0.0, 0.3, 0.4]),
                ("откладывает решение на потом", [0.3, -0.4, 0.0, 0.0], [0.5, 0.0, 0.0, 0.0, 0.0]),
                ("действует импульсивно", [0.0, 0.6, 0.0, -0.2], [0.0, 0.6, 0.0, 0.0, 0.0]),
            ],
        ),
        (
            "screen_3",
            "Когда клиент совершает ошибку, он:",
            [
                ("жёстко себя осуждает", [-0.6, 0.0, 0.0, 0.4], [0.0, 0.0, 0.6, 0.0, 0.0]),
                ("перекладывает ответственность", [0.0, 0.5, -0.5, 0.0], [0.0, 0.3, 0.0, 0.0, 0.3]),
                ("быстро анализирует и двигается дальше", [0.3, 0.0, 0.3, 0.0], [0.2, 0.2, 0.2, 0.2, 0.2]),
            ],
        ),
        (
            "screen_4",
            "В моменты сильного стресса клиент:",
            [
                ("диссоциируется, теряет контакт с собой", [0.0, 0.0, 0.0, 0.6], [0.0, 0.0, 0.0, 0.0, 0.7]),
                ("ищет поддержки у других", [0.5, 0.0, 0.2, 0.0], [0.4, 0.0, 0.2, 0.0, 0.0]),
                ("гиперконтролирует ситуацию", [0.0, 0.4, 0.0, 0.5], [0.0, 0.2, 0.0, 0.5, 0.0]),
            ],
        ),
        (
            "screen_5",
            "Как клиент описывает свои долгосрочные цели:",
            [
                ("расплывчато, без конкретики", [0.2, -0.3, 0.0, 0.0], [0.3, 0.0, 0.0, 0.3, 0.0]),
                ("чрезмерно амбициозно и жёстко", [0.0, 0.5, 0.0, 0.3], [0.0, 0.3, 0.0, 0.0, 0.3]),
                ("реалистично, с пониманием рисков", [0.3, 0.2, 0.3, 0.0], [0.2, 0.2, 0.2, 0.2, 0.2]),
            ],
        ),
    ];

    let (screen_id, prompt, options) = screens[index.min(5)];
    Phase1Screen {
        screen_id: screen_id.to_string(),
        prompt: prompt.to_string(),
        options: options
            .iter()
            .map(|(text, a, l)| opt(text, *a, *l))
            .collect(),
    }
}

/// Every `A{j}_L{k}` node this bank has a Phase 2 template for.
pub fn get_all_phase2_nodes() -> Vec<String> {
    vec![
        "A1_L0".to_string(),
        "A2_L1".to_string(),
        "A3_L2".to_string(),
        "A4_L3".to_string(),
        "A1_L4".to_string(),
        "A2_L0".to_string(),
    ]
}

pub fn get_phase2_template(node: &str) -> Option<Phase2Template> {
    let (question, split, options): (&str, &str, [(&str, [f64; 4], [f64; 5]); 2]) = match node {
        "A1_L0" => (
            "Когда клиент вспоминает детство, преобладающее чувство:",
            "доверие/небезопасность",
            [
                ("тепло и поддержка", [0.5, 0.0, 0.0, 0.0], [0.6, 0.0, 0.0, 0.0, 0.0]),
                ("тревога и нестабильность", [-0.5, 0.0, 0.0, 0.3], [0.6, 0.0, 0.0, 0.2, 0.0]),
            ],
        ),
        "A2_L1" => (
            "В споре с партнёром клиент обычно:",
            "напор/уступка",
            [
                ("настаивает до конца", [0.0, 0.6, 0.0, 0.0], [0.0, 0.6, 0.0, 0.0, 0.0]),
                ("уступает, лишь бы закончить", [0.2, -0.5, 0.0, 0.0], [0.0, 0.5, 0.0, 0.0, 0.0]),
            ],
        ),
        "A3_L2" => (
            "Ответственность за общий результат клиент чаще:",
            "берёт на себя/делит",
            [
                ("берёт полностью на себя", [0.0, 0.0, 0.6, 0.0], [0.0, 0.0, 0.6, 0.0, 0.0]),
                ("делит поровну с другими", [0.0, 0.0, -0.3, 0.0], [0.0, 0.0, 0.4, 0.0, 0.0]),
            ],
        ),
        "A4_L3" => (
            "Доступ к собственным чувствам у клиента:",
            "ясный/размытый",
            [
                ("ясный, легко называет эмоции", [0.0, 0.0, 0.0, -0.4], [0.0, 0.0, 0.0, 0.6, 0.0]),
                ("размытый, с трудом формулирует", [0.0, 0.0, 0.0, 0.5], [0.0, 0.0, 0.0, 0.6, 0.0]),
            ],
        ),
        "A1_L4" => (
            "В кризисный момент клиент скорее:",
            "контакт с собой/диссоциация",
            [
                ("остаётся в контакте с собой", [0.4, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0, 0.6]),
                ("теряет контакт, как будто отключается", [-0.4, 0.0, 0.0, 0.3], [0.0, 0.0, 0.0, 0.0, 0.7]),
            ],
        ),
        "A2_L0" => (
            "Базовое отношение к авторитетам у клиента:",
            "доверие/сопротивление",
            [
                ("доверяет и принимает указания", [0.0, -0.4, 0.0, 0.0], [0.5, 0.4, 0.0, 0.0, 0.0]),
                ("сопротивляется и оспаривает", [0.0, 0.5, 0.0, 0.0], [0.5, 0.5, 0.0, 0.0, 0.0]),
            ],
        ),
        _ => return None,
    };

    Some(Phase2Template {
        node: node.to_string(),
        reference_question: question.to_string(),
        diagnostic_split: split.to_string(),
        options: options.iter().map(|(text, a, l)| opt(text, *a, *l)).collect(),
    })
}
